//! Integration tests for LTG assignment from TSV inputs.

use ampliclean::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_tsv(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();
    file.flush().unwrap();
    file
}

/// Small insect taxonomy in the NCBI-derived layout, with one retired id.
fn create_taxonomy() -> Taxonomy {
    let file = write_tsv(
        "tax_id\tparent_tax_id\trank\tname_txt\told_tax_id\n\
         1\t1\tno rank\troot\t\n\
         2759\t1\tsuperkingdom\tEukaryota\t\n\
         33208\t2759\tkingdom\tMetazoa\t\n\
         6656\t33208\tphylum\tArthropoda\t\n\
         50557\t6656\tclass\tInsecta\t\n\
         7147\t50557\torder\tDiptera\t\n\
         7149\t7147\tfamily\tChironomidae\t\n\
         7157\t7147\tfamily\tCulicidae\t\n\
         7150\t7149\tgenus\tChironomus\t\n\
         315576\t7150\tspecies\tChironomus riparius\t\n\
         315577\t7150\tspecies\tChironomus plumosus\t\n\
         7174\t7157\tgenus\tCulex\t\n\
         7175\t7174\tspecies\tCulex pipiens\t1234.0\n",
    );
    Taxonomy::from_tsv(file.path()).unwrap()
}

fn create_hits() -> Vec<SimilarityHit> {
    let file = write_tsv(
        "variant_id\ttarget_tax_id\tidentity_percent\n\
         1\t315576\t99.0\n\
         1\t315576\t99.0\n\
         2\t315576\t80.0\n\
         2\t7175\t80.0\n\
         3\t315576\t100\n\
         3\t315577\t100\n\
         4\t1234\t97.5\n\
         4\t999999\t100\n",
    );
    read_hits_tsv(file.path()).unwrap()
}

#[test]
fn test_ltg_calls() {
    let _ = env_logger::builder().is_test(true).try_init();
    let taxonomy = create_taxonomy();
    let params = LtgParams {
        blast_db: Some("coi_db".to_string()),
        ..Params::default().ltg_params()
    };

    let assignments = assign_ltg(&[1, 2, 3, 4, 5], &create_hits(), &taxonomy, &params).unwrap();
    assert_eq!(assignments.len(), 5);

    // Two 99% hits on one species
    assert_eq!(
        assignments[0].call,
        LtgCall::Taxon {
            tax_id: 315576,
            rank: Rank::Species
        }
    );
    assert_eq!(assignments[0].identity, Some(99.0));

    // Two families at 80% with fewer than three taxa
    assert_eq!(assignments[1].call, LtgCall::Unassigned);

    // Sister species at 100% agree on the genus
    assert_eq!(assignments[2].ltg_tax_id(), Some(7150));
    assert_eq!(assignments[2].ltg_rank(), Some(Rank::Genus));

    // Retired id resolves, unknown id is dropped
    assert_eq!(assignments[3].ltg_tax_id(), Some(7175));
    assert_eq!(assignments[3].identity, Some(97.0));

    // No hits at all
    assert_eq!(assignments[4].call, LtgCall::Unassigned);
    assert!(assignments.iter().all(|a| a.blast_db.as_deref() == Some("coi_db")));
}

#[test]
fn test_lower_threshold_trusts_pairs() {
    let taxonomy = create_taxonomy();
    let params = LtgParams {
        min_number_of_taxa: 2,
        ..LtgParams::default()
    };

    let assignments = assign_ltg(&[2], &create_hits(), &taxonomy, &params).unwrap();
    assert_eq!(
        assignments[0].call,
        LtgCall::Taxon {
            tax_id: 7147,
            rank: Rank::Order
        }
    );
    assert_eq!(assignments[0].identity, Some(80.0));
}

#[test]
fn test_asv_lineage_names() {
    let taxonomy = create_taxonomy();
    let variants: VariantSet = vec![(1, "ACGACGACG".to_string())].into_iter().collect();
    let counts = ReadCountTable::new(vec![
        ReadCountRecord::new(1, 1, 1, 1, 1, 40),
        ReadCountRecord::new(1, 1, 1, 2, 1, 60),
    ])
    .unwrap();
    let assignments =
        assign_ltg(&counts.alive_variant_ids(), &create_hits(), &taxonomy, &LtgParams::default())
            .unwrap();

    let asv = build_asv_table(&counts, &variants, &[], Some((&taxonomy, &assignments))).unwrap();
    let taxon = asv.rows[0].taxon.as_ref().unwrap();
    assert_eq!(taxon.ltg_tax_name.as_deref(), Some("Chironomus riparius"));
    assert_eq!(taxon.lineage_name(Rank::Phylum), Some("Arthropoda"));
    assert_eq!(taxon.lineage_name(Rank::Family), Some("Chironomidae"));
    assert_eq!(taxon.lineage_name(Rank::Species), Some("Chironomus riparius"));
    assert_eq!(asv.rows[0].read_count, 100);
}

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

//! Read-only checks against a retail College Hoops 2K8 directory

use choops_formats::{NoLookup, TitleProfile};
use choops_storage::{GameArchive, StoreConfig};
use choops_test_utils::{find_game_dir, print_setup_instructions};
use std::sync::Arc;

#[tokio::test]
#[ignore] // Requires retail game data in CHOOPS2K8_USRDIR
async fn test_scan_retail_archive() {
    let Some(game_dir) = find_game_dir() else {
        print_setup_instructions();
        return;
    };

    let config = StoreConfig::new(&game_dir).with_profile(TitleProfile::Choops2k8);
    let archive = GameArchive::open(config, Arc::new(NoLookup)).await.unwrap();
    assert!(!archive.entries().is_empty());
    if archive.is_migrated() {
        assert!(archive.has_pristine_layout());
    }

    let mut bytes = 0u64;
    let visited = archive
        .scan(|entry, data| {
            assert_eq!(data.len() as u64, entry.size, "entry {}", entry.name);
            bytes += entry.size;
            Ok(())
        })
        .unwrap();

    assert_eq!(visited, archive.entries().len());
    println!(
        "Scanned {} entries ({} bytes) in {}",
        visited,
        bytes,
        game_dir.display()
    );
}

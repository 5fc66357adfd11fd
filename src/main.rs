use std::sync::Arc;

use strata::buffer::BufferPoolManager;
use strata::common::{PageId, RecordId, SlotId};
use strata::index::BTreeIndex;
use strata::storage::disk::DiskManager;

fn main() {
    println!("Strata - storage and indexing core demo");
    println!("=======================================\n");

    let db_path = "demo.db";
    let disk_manager = Arc::new(DiskManager::new(db_path).expect("failed to open database file"));
    println!("Opened database file: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
    println!("Created buffer pool with 64 frames (LRU-2 replacement)\n");

    let index =
        BTreeIndex::create("demo_idx", bpm.clone(), 4, 4).expect("failed to create index");

    for key in [7u32, 3, 11, 1, 9, 5, 13, 2, 8] {
        let rid = RecordId::new(PageId::new(100 + key), SlotId::new(0));
        index.insert(key, rid).expect("insert failed");
        println!("Inserted key {} -> {}", key, rid);
    }

    println!("\nPoint lookups:");
    for key in [1u32, 9, 42] {
        match index.get(key).expect("lookup failed") {
            Some(rid) => println!("  key {} -> {}", key, rid),
            None => println!("  key {} -> (not found)", key),
        }
    }

    index.remove(7).expect("remove failed");
    index.remove(3).expect("remove failed");
    println!("\nRemoved keys 7 and 3");

    print!("\nFull scan:");
    let mut iter = index.iter().expect("scan failed");
    while let Some((key, _rid)) = iter.next().expect("scan failed") {
        print!(" {}", key);
    }
    println!();

    bpm.flush_all_pages().expect("flush failed");
    println!("\nFlushed all pages to disk");

    std::fs::remove_file(db_path).ok();
    println!("Demo completed");
}

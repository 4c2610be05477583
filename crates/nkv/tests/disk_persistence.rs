// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Disk-tier scenarios: restart reload, disk-only serving, async
//! persistence, TTL expiry, and delete across tiers.

mod common;

use common::{delete, get, post, post_with};
use nkv::{BlockType, DiskMode, Engine, EngineConfig, Housekeeper, Rule};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn disk_engine(root: &std::path::Path) -> Engine {
    Engine::new(EngineConfig::new().root(root)).expect("engine")
}

fn run_ticks(engine: &Engine, n: usize) -> Housekeeper {
    let mut hk = Housekeeper::new(engine);
    for _ in 0..n {
        hk.tick();
    }
    hk
}

#[test]
fn sync_store_survives_restart() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("ns");
    let rule = Arc::new(Rule::new("r").mode(DiskMode::Sync));

    {
        let engine = disk_engine(&root);
        let out = post_with(
            &engine,
            &rule,
            "/p",
            b"persist",
            &[("content-type", "application/octet-stream")],
        );
        assert_eq!(out.status(), Some(200));
    }

    // fresh process: empty dictionary, non-empty root; the read probes the
    // shard directly, before any loader tick
    let engine = disk_engine(&root);
    let out = get(&engine, &rule, "/p");
    assert_eq!(out.status(), Some(200));
    assert_eq!(out.body(), b"persist");
    assert_eq!(
        out.header("content-type"),
        Some(b"application/octet-stream".to_vec())
    );

    // disk-hit emission order: header region, payload, EOM
    let types = out.block_types();
    assert_eq!(types.first(), Some(&BlockType::StatusLine));
    let eoh = types.iter().position(|t| *t == BlockType::Eoh).expect("eoh");
    assert!(types[eoh + 1..types.len() - 1]
        .iter()
        .all(|t| *t == BlockType::Data));
    assert_eq!(types.last(), Some(&BlockType::Eom));
}

#[test]
fn lazy_load_resurrects_index_after_restart() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("ns");
    let rule = Arc::new(Rule::new("r").mode(DiskMode::Sync));

    {
        let engine = disk_engine(&root);
        post(&engine, &rule, "/a", b"alpha");
        post(&engine, &rule, "/b", b"beta");
    }

    let engine = disk_engine(&root);
    let hk = run_ticks(&engine, 5);
    assert!(hk.loaded());

    // both keys serve through their resurrected entries
    assert_eq!(get(&engine, &rule, "/a").body(), b"alpha");
    assert_eq!(get(&engine, &rule, "/b").body(), b"beta");
}

#[test]
fn disk_only_rule_always_serves_from_disk() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("ns");
    let rule = Arc::new(Rule::new("r").mode(DiskMode::Only));
    let engine = disk_engine(&root);

    assert_eq!(post(&engine, &rule, "/d", b"on-disk").status(), Some(200));

    // served via the disk path in the same process
    let before = engine.stats();
    let out = get(&engine, &rule, "/d");
    assert_eq!(out.status(), Some(200));
    assert_eq!(out.body(), b"on-disk");
    let after = engine.stats();
    assert_eq!(after.disk_hits, before.disk_hits + 1);
    assert_eq!(after.hits, before.hits);
}

#[test]
fn async_rule_persists_in_background() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("ns");
    let rule = Arc::new(Rule::new("r").mode(DiskMode::Async));

    {
        let engine = disk_engine(&root);
        post(&engine, &rule, "/az", b"async-value");

        // memory hit first, no file yet
        assert_eq!(get(&engine, &rule, "/az").body(), b"async-value");

        // housekeeper persists it in the background
        run_ticks(&engine, 16);
    }

    // restart: the value must come back from disk
    let engine = disk_engine(&root);
    let out = get(&engine, &rule, "/az");
    assert_eq!(out.status(), Some(200));
    assert_eq!(out.body(), b"async-value");
}

#[test]
fn delete_removes_value_from_every_tier() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("ns");
    let rule = Arc::new(Rule::new("r").mode(DiskMode::Sync));
    let engine = disk_engine(&root);

    post(&engine, &rule, "/k", b"x");
    assert_eq!(delete(&engine, &rule, "/k").status(), Some(200));

    // no fallthrough to the disk path, in this process or the next
    assert_eq!(get(&engine, &rule, "/k").status(), Some(404));
    drop(engine);
    let engine = disk_engine(&root);
    assert_eq!(get(&engine, &rule, "/k").status(), Some(404));
}

#[test]
fn ttl_expiry_turns_reads_into_misses() {
    let engine = Engine::new(EngineConfig::new()).expect("engine");
    let rule = Arc::new(Rule::new("r").ttl_secs(1));

    post(&engine, &rule, "/t", b"short-lived");
    assert_eq!(get(&engine, &rule, "/t").status(), Some(200));

    std::thread::sleep(Duration::from_millis(1200));
    assert_eq!(get(&engine, &rule, "/t").status(), Some(404));

    // the sweep eventually removes the entry entirely
    run_ticks(&engine, 3);
    assert_eq!(engine.stats().used_mem, 0);
}

#[test]
fn expired_record_is_not_served_after_restart() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("ns");
    let rule = Arc::new(Rule::new("r").mode(DiskMode::Sync).ttl_secs(1));

    {
        let engine = disk_engine(&root);
        post(&engine, &rule, "/e", b"stale");
    }

    std::thread::sleep(Duration::from_millis(1200));
    let engine = disk_engine(&root);
    assert_eq!(get(&engine, &rule, "/e").status(), Some(404));
}

#[test]
fn overwrite_leaves_single_record_on_disk() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("ns");
    let rule = Arc::new(Rule::new("r").mode(DiskMode::Sync));

    {
        let engine = disk_engine(&root);
        post(&engine, &rule, "/k", b"first");
        post(&engine, &rule, "/k", b"second");
    }

    // after restart only the latest generation answers
    let engine = disk_engine(&root);
    assert_eq!(get(&engine, &rule, "/k").body(), b"second");

    // exactly one record file exists under the root
    let mut files = 0;
    for level1 in std::fs::read_dir(&root).expect("root") {
        for level2 in std::fs::read_dir(level1.expect("dir").path()).expect("shard") {
            files += std::fs::read_dir(level2.expect("dir").path())
                .expect("leaf")
                .count();
        }
    }
    assert_eq!(files, 1);
}

//! Tests for artifact storage: naming discipline, round-trip, and the
//! consolidated correlation record.

use vermeer::storage::{ArtifactMetadata, ArtifactStorage, UpscaleEntry};
use vermeer::{ArtifactKind, FileSystemStorage, MemoryStorage, Snowflake};

fn grid_meta(grid_id: u64) -> ArtifactMetadata {
    ArtifactMetadata {
        kind: ArtifactKind::Grid,
        prompt: "beautiful cosmic space dolphin --v 6.1".into(),
        grid_message_id: Snowflake::from(grid_id),
        message_id: Some(Snowflake::from(grid_id)),
        variant_index: None,
        source_url: "https://cdn.discordapp.com/attachments/1/2/grid.png".into(),
        mime: "image/png".into(),
    }
}

fn upscale_meta(grid_id: u64, variant: u8) -> ArtifactMetadata {
    ArtifactMetadata {
        kind: ArtifactKind::Upscale,
        prompt: "beautiful cosmic space dolphin --v 6.1".into(),
        grid_message_id: Snowflake::from(grid_id),
        message_id: Some(Snowflake::from(grid_id + 10 + variant as u64)),
        variant_index: Some(variant),
        source_url: format!("https://cdn.discordapp.com/attachments/1/2/u{variant}.png"),
        mime: "image/png".into(),
    }
}

#[tokio::test]
async fn filesystem_round_trip_preserves_bytes_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileSystemStorage::new(dir.path()).unwrap();

    let bytes = b"png bytes stand-in".to_vec();
    let meta = grid_meta(1001);
    let storage_id = storage.save_grid(&bytes, &meta).await.unwrap();

    let (loaded_bytes, loaded_meta) = storage.load(&storage_id).await.unwrap();
    assert_eq!(loaded_bytes, bytes);
    assert_eq!(loaded_meta, meta);
}

#[tokio::test]
async fn filesystem_layout_follows_the_naming_discipline() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileSystemStorage::new(dir.path()).unwrap();

    storage.save_grid(b"grid", &grid_meta(1001)).await.unwrap();
    storage
        .save_upscale(b"u0", &upscale_meta(1001, 0))
        .await
        .unwrap();
    storage
        .save_upscale(b"u3", &upscale_meta(1001, 3))
        .await
        .unwrap();

    let generation_id = storage.current_generation().await.unwrap();
    // YYYYMMDD_HHMMSS
    assert_eq!(generation_id.len(), 15);
    assert_eq!(&generation_id[8..9], "_");

    let gen_dir = dir.path().join(&generation_id);
    for name in [
        format!("grid_{generation_id}.png"),
        format!("grid_{generation_id}.png.meta.json"),
        format!("variant_0_{generation_id}.png"),
        format!("variant_0_{generation_id}.png.meta.json"),
        format!("variant_3_{generation_id}.png"),
        format!("variant_3_{generation_id}.png.meta.json"),
        format!("prompt_{generation_id}.txt"),
        format!("generation_{generation_id}.json"),
    ] {
        assert!(
            gen_dir.join(&name).exists(),
            "missing expected file: {name}"
        );
    }

    // No temp files left behind.
    for entry in std::fs::read_dir(&gen_dir).unwrap() {
        let path = entry.unwrap().path();
        assert_ne!(
            path.extension().and_then(|e| e.to_str()),
            Some("tmp"),
            "temp file left behind: {}",
            path.display()
        );
    }

    let prompt = std::fs::read_to_string(gen_dir.join(format!("prompt_{generation_id}.txt"))).unwrap();
    assert_eq!(prompt, "beautiful cosmic space dolphin --v 6.1");
}

#[tokio::test]
async fn every_upscale_record_carries_the_grid_back_reference() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileSystemStorage::new(dir.path()).unwrap();

    storage.save_grid(b"grid", &grid_meta(2002)).await.unwrap();
    for variant in 0..4u8 {
        storage
            .save_upscale(b"bytes", &upscale_meta(2002, variant))
            .await
            .unwrap();
    }

    let generation_id = storage.current_generation().await.unwrap();
    let record: serde_json::Value = serde_json::from_slice(
        &std::fs::read(
            dir.path()
                .join(&generation_id)
                .join(format!("generation_{generation_id}.json")),
        )
        .unwrap(),
    )
    .unwrap();

    assert_eq!(record["grid_message_id"], "2002");
    let upscales = record["upscales"].as_array().unwrap();
    assert_eq!(upscales.len(), 4);
    for upscale in upscales {
        assert_eq!(upscale["grid_message_id"], "2002");
        assert_eq!(upscale["success"], true);
    }
}

#[tokio::test]
async fn append_metadata_upserts_by_variant() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileSystemStorage::new(dir.path()).unwrap();

    storage.save_grid(b"grid", &grid_meta(3003)).await.unwrap();
    let generation_id = storage.current_generation().await.unwrap();

    let failed = UpscaleEntry {
        variant: 2,
        success: false,
        image_file: String::new(),
        grid_message_id: Snowflake::from(3003u64),
    };
    storage.append_metadata(&generation_id, &failed).await.unwrap();

    // The variant later succeeds; the entry is replaced, not duplicated.
    storage
        .save_upscale(b"bytes", &upscale_meta(3003, 2))
        .await
        .unwrap();

    let record: serde_json::Value = serde_json::from_slice(
        &std::fs::read(
            dir.path()
                .join(&generation_id)
                .join(format!("generation_{generation_id}.json")),
        )
        .unwrap(),
    )
    .unwrap();
    let upscales = record["upscales"].as_array().unwrap();
    assert_eq!(upscales.len(), 1);
    assert_eq!(upscales[0]["variant"], 2);
    assert_eq!(upscales[0]["success"], true);
}

#[tokio::test]
async fn upscale_without_a_grid_group_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileSystemStorage::new(dir.path()).unwrap();
    let err = storage
        .save_upscale(b"bytes", &upscale_meta(1, 0))
        .await
        .expect_err("no generation group is open");
    assert!(format!("{err}").contains("save_grid first"));
}

#[tokio::test]
async fn memory_storage_honors_the_same_contract() {
    let storage = MemoryStorage::new();

    let grid_id = storage.save_grid(b"grid", &grid_meta(4004)).await.unwrap();
    let (bytes, meta) = storage.load(&grid_id).await.unwrap();
    assert_eq!(bytes, b"grid");
    assert_eq!(meta.kind, ArtifactKind::Grid);

    storage
        .save_upscale(b"u1", &upscale_meta(4004, 1))
        .await
        .unwrap();
    let generation_id = storage.current_generation().await.unwrap();
    let entries = storage.generation_entries(&generation_id).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].grid_message_id, Snowflake::from(4004u64));

    let failed = UpscaleEntry {
        variant: 1,
        success: false,
        image_file: String::new(),
        grid_message_id: Snowflake::from(4004u64),
    };
    storage.append_metadata(&generation_id, &failed).await.unwrap();
    let entries = storage.generation_entries(&generation_id).await;
    assert_eq!(entries.len(), 1, "upsert duplicated the variant entry");
    assert!(!entries[0].success);

    assert!(storage.load("mem:missing:grid").await.is_err());
}

use anyhow::Result;
use tempfile::tempdir;

use assist_vision::detect::{BoundingBox, EMBEDDING_DIM};
use assist_vision::{
    enroll, shared_memory_uri, FaceMatcher, GalleryStore, RecognitionResult, SqliteGalleryStore,
    UNKNOWN_LABEL,
};

fn embedding(seed: usize) -> Vec<f32> {
    (0..EMBEDDING_DIM)
        .map(|i| if i % 7 == seed % 7 { 3.0 } else { 0.1 * (i % 3) as f32 })
        .collect()
}

#[test]
fn enrolled_faces_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("gallery.db");
    let db_path = db_path.to_str().expect("utf-8 temp path");

    {
        let gallery = SqliteGalleryStore::open(db_path)?;
        enroll(&gallery, "alice", &embedding(1), Some(41), 1_000)?;
        enroll(&gallery, "bob", &embedding(2), None, 2_000)?;
    }

    let gallery = SqliteGalleryStore::open(db_path)?;
    let entries = gallery.get_all()?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "alice");
    assert_eq!(entries[0].tracking_id, Some(41));
    assert_eq!(entries[1].last_seen_ms, 2_000);

    let norm: f32 = entries[0].embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-4);
    Ok(())
}

#[test]
fn match_updates_last_seen_on_disk() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("gallery.db");
    let db_path = db_path.to_str().expect("utf-8 temp path");

    let gallery = SqliteGalleryStore::open(db_path)?;
    let id = enroll(&gallery, "alice", &embedding(1), None, 1_000)?;

    let bbox = BoundingBox::new(0, 0, 10, 10);
    let result = FaceMatcher::default().match_embedding(&embedding(1), bbox, &gallery, 9_000)?;
    match result {
        RecognitionResult::Matched { name, score, .. } => {
            assert_eq!(name, "alice");
            assert!(score > 0.99);
        }
        other => panic!("expected a match, got {:?}", other),
    }
    drop(gallery);

    let reopened = SqliteGalleryStore::open(db_path)?;
    let entry = reopened.get_by_name("alice")?.expect("alice enrolled");
    assert_eq!(entry.id, Some(id));
    assert_eq!(entry.last_seen_ms, 9_000);
    Ok(())
}

#[test]
fn shared_memory_gallery_is_visible_across_connections() -> Result<()> {
    let uri = shared_memory_uri();
    let writer = SqliteGalleryStore::open(&uri)?;
    let reader = SqliteGalleryStore::open(&uri)?;

    enroll(&writer, "carol", &embedding(3), None, 5)?;
    assert_eq!(reader.get_all()?.len(), 1);

    assert_eq!(writer.delete_by_name("carol")?, 1);
    assert!(reader.get_by_name("carol")?.is_none());
    Ok(())
}

#[test]
fn empty_gallery_reports_unknown() -> Result<()> {
    let gallery = SqliteGalleryStore::open(&shared_memory_uri())?;
    let bbox = BoundingBox::new(2, 2, 20, 20);
    let result = FaceMatcher::default().match_embedding(&embedding(4), bbox, &gallery, 0)?;
    assert_eq!(
        result,
        RecognitionResult::Matched {
            name: UNKNOWN_LABEL.to_string(),
            score: 0.0,
            bbox,
        }
    );
    Ok(())
}

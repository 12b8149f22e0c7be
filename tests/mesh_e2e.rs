//! End-to-end tests for the MemoryMesh façade
//!
//! Each test runs against fresh on-disk stores in a temp directory.
//! Run with: cargo test --test mesh_e2e

use memorymesh::{
    ConflictMode, EmbeddingSelector, MemoryMeshError, MemoryScope, MeshConfig, MemoryMesh,
    RecallOptions, RememberOptions, UpdateRequest,
};

struct TestMesh {
    mesh: MemoryMesh,
    _dir: tempfile::TempDir,
}

impl std::ops::Deref for TestMesh {
    type Target = MemoryMesh;

    fn deref(&self) -> &MemoryMesh {
        &self.mesh
    }
}

fn mesh_with(configure: impl FnOnce(&mut MeshConfig)) -> TestMesh {
    let dir = tempfile::tempdir().unwrap();
    let mut config = MeshConfig {
        project_path: Some(dir.path().join("project.db")),
        global_path: Some(dir.path().join("global.db")),
        compact_interval: 0,
        ..MeshConfig::default()
    };
    configure(&mut config);
    TestMesh {
        mesh: MemoryMesh::open(config).unwrap(),
        _dir: dir,
    }
}

fn test_mesh() -> TestMesh {
    mesh_with(|_| {})
}

#[test]
fn fresh_install_remember_recall() {
    let mesh = test_mesh();
    let id = mesh
        .remember(
            "User prefers Python and dark mode.",
            RememberOptions::default(),
        )
        .unwrap();
    assert_eq!(id.len(), 32);

    let results = mesh.recall("Python", RecallOptions::default()).unwrap();
    assert!(!results.is_empty());
    assert!(results[0].text.contains("Python"));
    // Access counts are bumped both in the store and the returned copy.
    assert_eq!(results[0].access_count, 1);
    let stored = mesh.get(&results[0].id).unwrap().unwrap();
    assert_eq!(stored.access_count, 1);
}

#[test]
fn category_routes_to_global_regardless_of_caller_scope() {
    let mesh = test_mesh();
    let id = mesh
        .remember(
            "I prefer vim over emacs",
            RememberOptions {
                category: Some("preference".to_string()),
                scope: Some(MemoryScope::Project),
                ..Default::default()
            },
        )
        .unwrap();

    let stored = mesh.get(&id).unwrap().unwrap();
    assert_eq!(stored.scope, MemoryScope::Global);
    assert_eq!(stored.metadata["category"], serde_json::json!("preference"));
    assert_eq!(mesh.count(Some(MemoryScope::Project)).unwrap(), 0);
}

#[test]
fn project_category_routes_to_project() {
    let mesh = test_mesh();
    let id = mesh
        .remember(
            "We chose sqlite over a client-server database",
            RememberOptions {
                category: Some("decision".to_string()),
                scope: Some(MemoryScope::Global),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(mesh.get(&id).unwrap().unwrap().scope, MemoryScope::Project);
}

#[test]
fn invalid_category_is_rejected() {
    let mesh = test_mesh();
    let err = mesh
        .remember(
            "some text",
            RememberOptions {
                category: Some("musings".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, MemoryMeshError::InvalidInput(_)));
}

#[test]
fn pin_overrides_auto_importance() {
    let mesh = test_mesh();
    let id = mesh
        .remember(
            "Some text",
            RememberOptions {
                auto_importance: true,
                pin: true,
                ..Default::default()
            },
        )
        .unwrap();

    let stored = mesh.get(&id).unwrap().unwrap();
    assert_eq!(stored.importance, 1.0);
    assert_eq!(stored.decay_rate, 0.0);
    assert!(stored.is_pinned());
    assert_eq!(stored.metadata["pinned"], serde_json::json!(true));
}

#[test]
fn auto_importance_replaces_default() {
    let mesh = test_mesh();
    let vague = mesh
        .remember(
            "ok",
            RememberOptions {
                auto_importance: true,
                ..Default::default()
            },
        )
        .unwrap();
    let concrete = mesh
        .remember(
            "Critical security fix for src/auth.rs shipped in v2.3.1 production deploy",
            RememberOptions {
                auto_importance: true,
                ..Default::default()
            },
        )
        .unwrap();

    let vague = mesh.get(&vague).unwrap().unwrap();
    let concrete = mesh.get(&concrete).unwrap().unwrap();
    assert!(vague.importance < 0.5);
    assert!(concrete.importance > vague.importance);
}

#[test]
fn cross_scope_migration_keeps_id_and_text() {
    let mesh = test_mesh();
    let id = mesh
        .remember(
            "Keep the retry budget at three attempts",
            RememberOptions {
                scope: Some(MemoryScope::Project),
                ..Default::default()
            },
        )
        .unwrap();

    let migrated = mesh
        .update(
            &id,
            UpdateRequest {
                scope: Some(MemoryScope::Global),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();

    assert_eq!(migrated.id, id);
    assert_eq!(migrated.scope, MemoryScope::Global);
    assert_eq!(migrated.text, "Keep the retry budget at three attempts");
    assert_eq!(mesh.count(Some(MemoryScope::Project)).unwrap(), 0);
    assert_eq!(mesh.count(Some(MemoryScope::Global)).unwrap(), 1);
}

#[test]
fn compaction_merges_near_duplicates() {
    let mesh = test_mesh();
    let keep = mesh
        .remember(
            "The staging cluster lives in us-east-1",
            RememberOptions {
                scope: Some(MemoryScope::Project),
                importance: Some(0.8),
                ..Default::default()
            },
        )
        .unwrap();
    mesh.remember(
        "The staging cluster lives in us-east-1",
        RememberOptions {
            scope: Some(MemoryScope::Project),
            importance: Some(0.5),
            ..Default::default()
        },
    )
    .unwrap();

    // Bump the secondary's access count so the sum is observable.
    let _ = mesh.recall("staging cluster", RecallOptions::default()).unwrap();

    let before = mesh.count(Some(MemoryScope::Project)).unwrap();
    let result = mesh.compact(MemoryScope::Project, None, false).unwrap();
    assert_eq!(result.merged_count, 1);
    assert_eq!(result.kept_ids, vec![keep.clone()]);
    assert!(mesh.count(Some(MemoryScope::Project)).unwrap() < before);

    let survivor = mesh.get(&keep).unwrap().unwrap();
    assert_eq!(survivor.importance, 0.8);
    let recalled_total: i64 = 2; // both copies were returned by the recall above
    assert_eq!(survivor.access_count, recalled_total);
}

#[test]
fn compaction_dry_run_changes_nothing() {
    let mesh = test_mesh();
    for _ in 0..2 {
        mesh.remember(
            "exact duplicate entry",
            RememberOptions {
                scope: Some(MemoryScope::Project),
                on_conflict: ConflictMode::KeepBoth,
                ..Default::default()
            },
        )
        .unwrap();
    }
    let result = mesh.compact(MemoryScope::Project, None, true).unwrap();
    assert_eq!(result.merged_count, 1);
    assert_eq!(mesh.count(Some(MemoryScope::Project)).unwrap(), 2);
}

#[test]
fn contradiction_keep_both_links_the_existing_memory() {
    let mesh = test_mesh();
    let first = mesh
        .remember(
            "The database host is localhost",
            RememberOptions {
                scope: Some(MemoryScope::Project),
                ..Default::default()
            },
        )
        .unwrap();
    let second = mesh
        .remember(
            "The database host is localhost",
            RememberOptions {
                scope: Some(MemoryScope::Project),
                on_conflict: ConflictMode::KeepBoth,
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(mesh.count(Some(MemoryScope::Project)).unwrap(), 2);
    let stored = mesh.get(&second).unwrap().unwrap();
    let contradicts = stored.metadata["contradicts"].as_array().unwrap();
    assert!(contradicts.contains(&serde_json::json!(first)));
}

#[test]
fn contradiction_skip_returns_empty_id() {
    let mesh = test_mesh();
    mesh.remember(
        "Deploys happen on Fridays",
        RememberOptions {
            scope: Some(MemoryScope::Project),
            ..Default::default()
        },
    )
    .unwrap();
    let id = mesh
        .remember(
            "Deploys happen on Fridays",
            RememberOptions {
                scope: Some(MemoryScope::Project),
                on_conflict: ConflictMode::Skip,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(id.is_empty());
    assert_eq!(mesh.count(Some(MemoryScope::Project)).unwrap(), 1);
}

#[test]
fn contradiction_update_replaces_best_match() {
    let mesh = test_mesh();
    let old = mesh
        .remember(
            "The database host is localhost",
            RememberOptions {
                scope: Some(MemoryScope::Project),
                ..Default::default()
            },
        )
        .unwrap();
    let new = mesh
        .remember(
            "The database host is localhost",
            RememberOptions {
                scope: Some(MemoryScope::Project),
                on_conflict: ConflictMode::Update,
                ..Default::default()
            },
        )
        .unwrap();

    assert!(mesh.get(&old).unwrap().is_none());
    let stored = mesh.get(&new).unwrap().unwrap();
    assert_eq!(
        stored.metadata["replaced_memory_id"],
        serde_json::json!(old)
    );
    assert_eq!(mesh.count(Some(MemoryScope::Project)).unwrap(), 1);
}

#[test]
fn secrets_are_flagged_and_optionally_redacted() {
    let mesh = test_mesh();
    let flagged = mesh
        .remember(
            "the token is sk-abcdefghijklmnopqrstuvwxyz",
            RememberOptions {
                scope: Some(MemoryScope::Project),
                ..Default::default()
            },
        )
        .unwrap();
    let stored = mesh.get(&flagged).unwrap().unwrap();
    assert_eq!(stored.metadata["has_secrets_warning"], serde_json::json!(true));
    assert!(stored.text.contains("sk-abcdef"));

    let redacted = mesh
        .remember(
            "the other token is sk-zyxwvutsrqponmlkjihgfedcba",
            RememberOptions {
                scope: Some(MemoryScope::Project),
                redact_secrets: true,
                ..Default::default()
            },
        )
        .unwrap();
    let stored = mesh.get(&redacted).unwrap().unwrap();
    assert!(stored.text.contains("[REDACTED]"));
    assert!(!stored.text.contains("sk-zyx"));
}

#[test]
fn session_boost_promotes_same_session_memories() {
    let mesh = test_mesh();
    mesh.remember(
        "standup notes from the infra team",
        RememberOptions {
            scope: Some(MemoryScope::Project),
            session_id: Some("sess-early".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    mesh.remember(
        "standup notes from the infra team",
        RememberOptions {
            scope: Some(MemoryScope::Project),
            ..Default::default()
        },
    )
    .unwrap();

    // Without the boost the later (more recent) copy wins the tie.
    let plain = mesh
        .recall("standup notes", RecallOptions::default())
        .unwrap();
    assert!(plain[0].session_id.is_none());

    let boosted = mesh
        .recall(
            "standup notes",
            RecallOptions {
                session_id: Some("sess-early".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(boosted[0].session_id.as_deref(), Some("sess-early"));
}

#[test]
fn recall_filters_compose() {
    let mesh = test_mesh();
    mesh.remember(
        "We decided to version the public API",
        RememberOptions {
            category: Some("decision".to_string()),
            importance: Some(0.9),
            ..Default::default()
        },
    )
    .unwrap();
    mesh.remember(
        "Background notes about the API",
        RememberOptions {
            category: Some("context".to_string()),
            importance: Some(0.2),
            ..Default::default()
        },
    )
    .unwrap();

    let results = mesh
        .recall(
            "API",
            RecallOptions {
                category: Some("decision".to_string()),
                min_importance: Some(0.5),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].metadata["category"], serde_json::json!("decision"));
}

#[test]
fn invalid_metadata_filter_key_is_a_validation_error() {
    let mesh = test_mesh();
    let mut metadata_filter = memorymesh::Metadata::new();
    metadata_filter.insert("bad-key".to_string(), serde_json::json!("x"));
    let err = mesh
        .recall(
            "anything",
            RecallOptions {
                metadata_filter: Some(metadata_filter),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, MemoryMeshError::InvalidInput(_)));
}

#[test]
fn project_scope_without_project_store_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let mesh = MemoryMesh::open(MeshConfig {
        project_path: None,
        global_path: Some(dir.path().join("global.db")),
        compact_interval: 0,
        ..MeshConfig::default()
    })
    .unwrap();

    let err = mesh
        .remember(
            "note",
            RememberOptions {
                scope: Some(MemoryScope::Project),
                ..Default::default()
            },
        )
        .unwrap_err();
    match err {
        MemoryMeshError::Config(message) => {
            assert!(message.contains("MEMORYMESH_PROJECT_ROOT"));
        }
        other => panic!("expected Config error, got {:?}", other),
    }

    // Default scope falls back to global when no project store exists.
    let id = mesh
        .remember("a perfectly neutral note", RememberOptions::default())
        .unwrap();
    assert_eq!(mesh.get(&id).unwrap().unwrap().scope, MemoryScope::Global);
}

#[test]
fn forget_and_forget_all() {
    let mesh = test_mesh();
    let id = mesh
        .remember("to be forgotten", RememberOptions::default())
        .unwrap();
    assert!(mesh.forget(&id).unwrap());
    assert!(!mesh.forget(&id).unwrap());

    for i in 0..3 {
        mesh.remember(
            &format!("bulk entry number {}", i),
            RememberOptions {
                scope: Some(MemoryScope::Project),
                ..Default::default()
            },
        )
        .unwrap();
    }
    mesh.remember(
        "global entry",
        RememberOptions {
            scope: Some(MemoryScope::Global),
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(mesh.forget_all(Some(MemoryScope::Project)).unwrap(), 3);
    assert_eq!(mesh.count(None).unwrap(), 1);
    assert_eq!(mesh.forget_all(None).unwrap(), 1);
    assert_eq!(mesh.count(None).unwrap(), 0);
}

#[test]
fn listings_interleave_both_scopes_by_recency() {
    let mesh = test_mesh();
    for (text, scope) in [
        ("project one", MemoryScope::Project),
        ("global one", MemoryScope::Global),
        ("project two", MemoryScope::Project),
    ] {
        mesh.remember(
            text,
            RememberOptions {
                scope: Some(scope),
                ..Default::default()
            },
        )
        .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    let all = mesh.list(10, 0, None).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].text, "project two");
    assert_eq!(all[1].text, "global one");
    assert_eq!(all[2].text, "project one");

    let paged = mesh.list(1, 1, None).unwrap();
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].text, "global one");
}

#[test]
fn sessions_span_both_stores() {
    let mesh = test_mesh();
    for scope in [MemoryScope::Project, MemoryScope::Global] {
        mesh.remember(
            "session entry",
            RememberOptions {
                scope: Some(scope),
                session_id: Some("shared".to_string()),
                on_conflict: ConflictMode::KeepBoth,
                ..Default::default()
            },
        )
        .unwrap();
    }

    let sessions = mesh.list_sessions(None).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, "shared");
    assert_eq!(sessions[0].count, 2);

    let members = mesh.get_session("shared", None).unwrap();
    assert_eq!(members.len(), 2);
    assert!(members[0].created_at <= members[1].created_at);
}

#[test]
fn auto_compaction_runs_every_n_writes() {
    let mesh = mesh_with(|config| config.compact_interval = 3);
    for _ in 0..3 {
        mesh.remember(
            "the very same duplicated fact",
            RememberOptions {
                scope: Some(MemoryScope::Project),
                on_conflict: ConflictMode::KeepBoth,
                ..Default::default()
            },
        )
        .unwrap();
    }
    // The third write crossed the interval and compacted the duplicates.
    assert_eq!(mesh.count(Some(MemoryScope::Project)).unwrap(), 1);
}

#[test]
fn noop_embedder_falls_back_to_keyword_recall() {
    let mesh = mesh_with(|config| config.embedding = EmbeddingSelector::Noop);
    mesh.remember(
        "the cache key includes the tenant id",
        RememberOptions::default(),
    )
    .unwrap();

    let results = mesh
        .recall("tenant", RecallOptions::default())
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].embedding.is_none());
}

#[test]
fn encrypted_mesh_round_trips_and_hides_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let global_path = dir.path().join("global.db");
    let make_config = |key: &str| MeshConfig {
        project_path: None,
        global_path: Some(global_path.clone()),
        encryption_key: Some(key.to_string()),
        compact_interval: 0,
        ..MeshConfig::default()
    };

    let id = {
        let mesh = MemoryMesh::open(make_config("passphrase")).unwrap();
        let mut metadata = memorymesh::Metadata::new();
        metadata.insert("topic".to_string(), serde_json::json!("infra"));
        let id = mesh
            .remember(
                "the bastion host rotates keys nightly",
                RememberOptions {
                    metadata: Some(metadata),
                    ..Default::default()
                },
            )
            .unwrap();

        // Vector recall still works on encrypted rows.
        let results = mesh
            .recall("bastion keys", RecallOptions::default())
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].text, "the bastion host rotates keys nightly");
        mesh.close();
        id
    };

    let bytes = std::fs::read(&global_path).unwrap();
    let haystack = String::from_utf8_lossy(&bytes);
    assert!(!haystack.contains("bastion host"));
    assert!(!haystack.contains("\"topic\""));

    // Reopening with the same passphrase restores the plaintext.
    let mesh = MemoryMesh::open(make_config("passphrase")).unwrap();
    let stored = mesh.get(&id).unwrap().unwrap();
    assert_eq!(stored.text, "the bastion host rotates keys nightly");
    assert_eq!(stored.metadata["topic"], serde_json::json!("infra"));
}

#[test]
fn smart_sync_prefers_recent_important_memories() {
    let mesh = test_mesh();
    mesh.remember(
        "a minor scratch note",
        RememberOptions {
            importance: Some(0.1),
            scope: Some(MemoryScope::Project),
            ..Default::default()
        },
    )
    .unwrap();
    mesh.remember(
        "the canonical deployment runbook",
        RememberOptions {
            importance: Some(1.0),
            scope: Some(MemoryScope::Project),
            ..Default::default()
        },
    )
    .unwrap();

    let picked = mesh.smart_sync(1, None, None).unwrap();
    assert_eq!(picked.len(), 1);
    assert_eq!(picked[0].text, "the canonical deployment runbook");
}

#[test]
fn review_reports_issues_and_quality_score() {
    let mesh = test_mesh();
    mesh.remember(
        "User prefers tabs across all projects",
        RememberOptions {
            scope: Some(MemoryScope::Project),
            ..Default::default()
        },
    )
    .unwrap();

    let result = mesh.review(None, None, None).unwrap();
    assert_eq!(result.total_reviewed, 1);
    assert!(result.quality_score < 100);
    assert!(result
        .issues
        .iter()
        .any(|i| i.issue_type == memorymesh::intelligence::IssueType::ScopeMismatch));
}

#[test]
fn update_refreshes_embedding_when_text_changes() {
    let mesh = test_mesh();
    let id = mesh
        .remember(
            "initial content about caching",
            RememberOptions {
                scope: Some(MemoryScope::Project),
                ..Default::default()
            },
        )
        .unwrap();
    let before = mesh.get(&id).unwrap().unwrap();

    let updated = mesh
        .update(
            &id,
            UpdateRequest {
                text: Some("entirely different content about sharding".to_string()),
                importance: Some(0.9),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();

    assert_eq!(updated.text, "entirely different content about sharding");
    assert_eq!(updated.importance, 0.9);
    assert!(updated.embedding.is_some());
    assert_ne!(updated.embedding, before.embedding);
    assert!(updated.updated_at >= before.updated_at);
}

#[test]
fn update_unknown_id_returns_none() {
    let mesh = test_mesh();
    let result = mesh
        .update(
            "00000000000000000000000000000000",
            UpdateRequest {
                importance: Some(0.9),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(result.is_none());
}

#[test]
fn time_range_spans_both_stores() {
    let mesh = test_mesh();
    assert!(mesh.get_time_range(None).unwrap().is_none());

    mesh.remember(
        "first",
        RememberOptions {
            scope: Some(MemoryScope::Project),
            ..Default::default()
        },
    )
    .unwrap();
    mesh.remember(
        "second",
        RememberOptions {
            scope: Some(MemoryScope::Global),
            ..Default::default()
        },
    )
    .unwrap();

    let (oldest, newest) = mesh.get_time_range(None).unwrap().unwrap();
    assert!(oldest <= newest);
}

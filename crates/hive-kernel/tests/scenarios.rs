//! End-to-end scenarios over an in-memory database: journal semantics,
//! projection consistency, replay, reservations, the bead graph, and
//! memory retrieval.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use hive_kernel::{
    AgentSpec, BeadFilter, BeadStatus, CreateBeadOptions, Embedder, EmbedderHealth, EventFilter,
    EventPayload, Importance, InboxOptions, IssueType, Kernel, KernelError, MemoryFindOptions,
    MemoryStoreOptions, Relationship, ReplayOptions, ReserveOptions, SendOptions, EMBEDDING_DIM,
};
use hive_store::Db;

fn kernel() -> Kernel {
    Kernel::open_with_db(Db::open_sqlite_memory().unwrap()).unwrap()
}

/// Deterministic bag-of-tokens embedder: each token bumps one dimension, the
/// vector is L2-normalized. Shared tokens produce positive cosine
/// similarity; disjoint texts are orthogonal.
struct HashEmbedder;

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> hive_store::Result<Vec<f32>> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            v[(hasher.finish() as usize) % EMBEDDING_DIM] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            v[0] = 1.0;
        } else {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn health_check(&self) -> hive_store::Result<EmbedderHealth> {
        Ok(EmbedderHealth {
            ok: true,
            model: "hash-test".into(),
        })
    }
}

/// Always unreachable, to exercise the FTS fallback.
struct DownEmbedder;

impl Embedder for DownEmbedder {
    fn embed(&self, _text: &str) -> hive_store::Result<Vec<f32>> {
        Err(KernelError::Unavailable("embedder offline".into()))
    }

    fn health_check(&self) -> hive_store::Result<EmbedderHealth> {
        Ok(EmbedderHealth {
            ok: false,
            model: "down".into(),
        })
    }
}

#[test]
fn append_read_latest_on_empty_db() {
    let k = kernel();
    assert_eq!(k.latest_sequence(None).unwrap(), 0);

    k.register_agent("p", "A1", AgentSpec::default()).unwrap();

    let events = k
        .read_events(&EventFilter {
            project_key: Some("p".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sequence, 1);
    assert_eq!(events[0].kind(), "agent_registered");
    assert_eq!(k.latest_sequence(None).unwrap(), 1);
    assert_eq!(k.latest_sequence(Some("p")).unwrap(), 1);
    assert_eq!(k.latest_sequence(Some("other")).unwrap(), 0);
}

#[test]
fn sequences_are_strictly_increasing() {
    let k = kernel();
    let mut last = 0;
    for i in 0..20 {
        let event = k
            .append_event(
                "p",
                EventPayload::CheckpointCreated {
                    name: format!("cp-{i}"),
                    data: serde_json::json!({}),
                },
            )
            .unwrap();
        assert!(event.sequence > last);
        last = event.sequence;
    }
}

#[test]
fn replay_restores_overwritten_projection() {
    let k = kernel();
    k.register_agent(
        "p",
        "A1",
        AgentSpec {
            task_description: Some("Original".into()),
            ..Default::default()
        },
    )
    .unwrap();

    // Corrupt the projection behind the registry's back.
    k.db()
        .query(
            "UPDATE agents SET task_description = 'Corrupted' WHERE name = 'A1'",
            &[],
        )
        .unwrap();

    let report = k
        .replay_events(&ReplayOptions {
            clear_views: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(report.events_replayed, 1);

    let agent = k.get_agent("p", "A1").unwrap().unwrap();
    assert_eq!(agent.task_description.as_deref(), Some("Original"));
}

#[test]
fn replay_is_deterministic() {
    let k = kernel();
    k.register_agent("p", "W", AgentSpec::default()).unwrap();
    let b1 = k.create_bead("p", "first", CreateBeadOptions::default()).unwrap();
    let b2 = k.create_bead("p", "second", CreateBeadOptions::default()).unwrap();
    k.add_dependency("p", &b2.id, &b1.id, Relationship::Blocks)
        .unwrap();
    k.close_bead("p", &b1.id, Some("done")).unwrap();

    let snapshot = |k: &Kernel| {
        let beads = k
            .query_beads(
                "p",
                &BeadFilter {
                    include_deleted: true,
                    ..Default::default()
                },
            )
            .unwrap();
        serde_json::to_string(&beads).unwrap()
    };

    k.replay_events(&ReplayOptions {
        clear_views: true,
        ..Default::default()
    })
    .unwrap();
    let first = snapshot(&k);
    k.replay_events(&ReplayOptions {
        clear_views: true,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(first, snapshot(&k));
}

#[test]
fn batch_append_is_atomic() {
    let k = kernel();
    let before = k.latest_sequence(None).unwrap();
    // The second payload's projection fails (no such bead), so the whole
    // batch must roll back.
    let result = k.append_events(
        "p",
        vec![
            EventPayload::CheckpointCreated {
                name: "ok".into(),
                data: serde_json::json!({}),
            },
            EventPayload::BeadClosed {
                bead_id: "bd-missing".into(),
                reason: None,
            },
        ],
    );
    assert!(result.is_err());
    assert_eq!(k.latest_sequence(None).unwrap(), before);
}

#[test]
fn inbox_orders_importance_then_recency() {
    let k = kernel();
    let to = vec!["W".to_string()];
    k.send_message("p", "coord", &to, "low", "b", SendOptions {
        importance: Importance::Low,
        ..Default::default()
    })
    .unwrap();
    k.send_message("p", "coord", &to, "urgent", "b", SendOptions {
        importance: Importance::Urgent,
        ..Default::default()
    })
    .unwrap();
    k.send_message("p", "coord", &to, "normal", "b", SendOptions::default())
        .unwrap();

    let inbox = k.inbox("p", "W", &InboxOptions::default()).unwrap();
    let subjects: Vec<&str> = inbox.iter().map(|m| m.subject.as_str()).collect();
    assert_eq!(subjects, vec!["urgent", "normal", "low"]);
}

#[test]
fn empty_recipient_list_is_invalid() {
    let k = kernel();
    let err = k
        .send_message("p", "coord", &[], "s", "b", SendOptions::default())
        .unwrap_err();
    assert!(matches!(err, KernelError::Invalid(_)));
}

#[test]
fn read_and_ack_are_idempotent_per_recipient() {
    let k = kernel();
    let to = vec!["W1".to_string(), "W2".to_string()];
    let sent = k
        .send_message("p", "coord", &to, "s", "full body", SendOptions::default())
        .unwrap();

    let first = k.read_message("p", &sent.id, "W1").unwrap();
    let again = k.read_message("p", &sent.id, "W1").unwrap();
    assert_eq!(first.read_at, again.read_at);
    assert_eq!(again.body, "full body");

    // W2 is untouched by W1's read.
    let unread = k
        .inbox("p", "W2", &InboxOptions {
            unread_only: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(unread.len(), 1);

    k.ack_message("p", &sent.id, "W1").unwrap();
    k.ack_message("p", &sent.id, "W1").unwrap();
    let record = k.read_message("p", &sent.id, "W1").unwrap();
    assert!(record.acked_at.is_some());
}

#[test]
fn reservation_retry_is_idempotent() {
    let k = kernel();
    let paths = vec!["src/**".to_string()];
    k.reserve_files("p", "W", &paths, ReserveOptions::default())
        .unwrap();
    k.reserve_files("p", "W", &paths, ReserveOptions::default())
        .unwrap();

    let active = k.active_reservations("p").unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].agent_name, "W");
    assert_eq!(active[0].path_pattern, "src/**");
}

#[test]
fn exclusive_overlap_is_a_conflict() {
    let k = kernel();
    k.reserve_files("p", "W1", &["src/**".to_string()], ReserveOptions::default())
        .unwrap();
    let err = k
        .reserve_files(
            "p",
            "W2",
            &["src/main.rs".to_string()],
            ReserveOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, KernelError::Conflict(_)));

    // Non-exclusive claims on overlapping patterns coexist.
    let shared = ReserveOptions {
        exclusive: false,
        ..Default::default()
    };
    k.reserve_files("p", "R1", &["docs/**".to_string()], shared.clone())
        .unwrap();
    k.reserve_files("p", "R2", &["docs/api.md".to_string()], shared)
        .unwrap();
}

#[test]
fn scoped_reservation_releases_on_error() {
    let k = kernel();
    let paths = vec!["src/lib.rs".to_string()];
    let result: hive_store::Result<()> =
        k.with_reservation("p", "W", &paths, ReserveOptions::default(), |_| {
            Err(KernelError::Invalid("worker blew up".into()))
        });
    assert!(result.is_err());
    assert!(k.active_reservations("p").unwrap().is_empty());
}

#[test]
fn ttl_expiry_is_derived_then_materialized() {
    let k = kernel();
    k.reserve_files(
        "p",
        "W",
        &["src/**".to_string()],
        ReserveOptions {
            ttl_seconds: Some(1),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(k.active_reservations("p").unwrap().len(), 1);

    let future = chrono::Utc::now().timestamp_millis() + 2_000;
    let swept = k.expire_reservations(future).unwrap();
    assert_eq!(swept, 1);
    assert!(k.active_reservations("p").unwrap().is_empty());

    // Another agent can now take the pattern.
    k.reserve_files("p", "W2", &["src/**".to_string()], ReserveOptions::default())
        .unwrap();
}

#[test]
fn blocking_resolution_drives_ready_queue() {
    let k = kernel();
    let c1 = k.create_bead("p", "C1", CreateBeadOptions::default()).unwrap();
    let c2 = k.create_bead("p", "C2", CreateBeadOptions::default()).unwrap();
    k.add_dependency("p", &c2.id, &c1.id, Relationship::Blocks)
        .unwrap();

    assert!(k.is_blocked("p", &c2.id).unwrap());
    assert_eq!(k.get_blockers("p", &c2.id).unwrap(), vec![c1.id.clone()]);
    let ready = k.next_ready_bead("p").unwrap().unwrap();
    assert_eq!(ready.id, c1.id);

    k.close_bead("p", &c1.id, Some("done")).unwrap();
    assert!(!k.is_blocked("p", &c2.id).unwrap());
    let ready = k.next_ready_bead("p").unwrap().unwrap();
    assert_eq!(ready.id, c2.id);
}

#[test]
fn ready_queue_orders_by_priority_then_age() {
    let k = kernel();
    k.create_bead(
        "p",
        "later",
        CreateBeadOptions {
            priority: Some(2),
            ..Default::default()
        },
    )
    .unwrap();
    let urgent = k
        .create_bead(
            "p",
            "urgent",
            CreateBeadOptions {
                priority: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(k.next_ready_bead("p").unwrap().unwrap().id, urgent.id);
}

#[test]
fn self_dependency_is_invalid() {
    let k = kernel();
    let bead = k.create_bead("p", "solo", CreateBeadOptions::default()).unwrap();
    let err = k
        .add_dependency("p", &bead.id, &bead.id, Relationship::Blocks)
        .unwrap_err();
    assert!(matches!(err, KernelError::Invalid(_)));
}

#[test]
fn short_id_resolution_requires_uniqueness() {
    let k = kernel();
    let a = k.create_bead("p", "a", CreateBeadOptions::default()).unwrap();
    let b = k.create_bead("p", "b", CreateBeadOptions::default()).unwrap();

    // A unique tail fragment resolves.
    let tail = &a.id[a.id.len() - 6..];
    if !b.id.contains(tail) {
        assert_eq!(k.resolve_short_id("p", tail).unwrap(), a.id);
    }

    // The shared prefix matches both.
    let err = k.resolve_short_id("p", "bd-").unwrap_err();
    assert!(matches!(err, KernelError::Conflict(_)));

    let err = k.resolve_short_id("p", "zzzzzz").unwrap_err();
    assert!(matches!(err, KernelError::NotFound(_)));
}

#[test]
fn status_change_rejects_tombstone_and_clears_closure() {
    let k = kernel();
    let bead = k.create_bead("p", "t", CreateBeadOptions::default()).unwrap();

    let err = k
        .change_bead_status("p", &bead.id, BeadStatus::Tombstone)
        .unwrap_err();
    assert!(matches!(err, KernelError::Invalid(_)));

    let closed = k.close_bead("p", &bead.id, Some("fixed")).unwrap();
    assert_eq!(closed.status, BeadStatus::Closed);
    assert!(closed.closed_at.is_some());
    assert_eq!(closed.closed_reason.as_deref(), Some("fixed"));

    let reopened = k.reopen_bead("p", &bead.id).unwrap();
    assert_eq!(reopened.status, BeadStatus::Open);
    assert!(reopened.closed_at.is_none());
    assert!(reopened.closed_reason.is_none());
}

#[test]
fn deleted_beads_leave_queries_unless_asked() {
    let k = kernel();
    let bead = k.create_bead("p", "doomed", CreateBeadOptions::default()).unwrap();
    k.delete_bead("p", &bead.id, Some("coord"), Some("dup")).unwrap();

    assert!(k.query_beads("p", &BeadFilter::default()).unwrap().is_empty());
    let all = k
        .query_beads(
            "p",
            &BeadFilter {
                include_deleted: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, BeadStatus::Tombstone);
    assert_eq!(all[0].deleted_by.as_deref(), Some("coord"));
}

#[test]
fn epic_closure_eligibility_tracks_children() {
    let k = kernel();
    let epic = k
        .create_bead(
            "p",
            "epic",
            CreateBeadOptions {
                issue_type: IssueType::Epic,
                ..Default::default()
            },
        )
        .unwrap();
    let child = k.create_bead("p", "child", CreateBeadOptions::default()).unwrap();
    k.add_child_to_epic("p", &epic.id, &child.id).unwrap();

    assert_eq!(k.get_epic_children("p", &epic.id).unwrap().len(), 1);
    assert!(!k.is_epic_closure_eligible("p", &epic.id).unwrap());

    k.close_bead("p", &child.id, None).unwrap();
    assert!(k.is_epic_closure_eligible("p", &epic.id).unwrap());

    k.close_bead("p", &epic.id, Some("all done")).unwrap();
    let err = k.add_child_to_epic("p", &epic.id, &child.id).unwrap_err();
    assert!(matches!(err, KernelError::Conflict(_)));
}

#[test]
fn comments_and_labels_round_trip() {
    let k = kernel();
    let bead = k.create_bead("p", "talky", CreateBeadOptions::default()).unwrap();

    k.add_label("p", &bead.id, "backend").unwrap();
    k.add_label("p", &bead.id, "backend").unwrap();
    assert_eq!(k.get_labels("p", &bead.id).unwrap(), vec!["backend"]);
    k.remove_label("p", &bead.id, "backend").unwrap();
    assert!(k.get_labels("p", &bead.id).unwrap().is_empty());

    let comment_id = k
        .add_comment("p", &bead.id, "W", "first pass done", None)
        .unwrap();
    k.update_comment("p", &comment_id, "first pass done, tests pending")
        .unwrap();
    let comments = k.get_comments("p", &bead.id).unwrap();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].body.ends_with("tests pending"));
    k.delete_comment("p", &comment_id).unwrap();
    assert!(k.get_comments("p", &bead.id).unwrap().is_empty());
}

#[test]
fn memory_find_ranks_by_similarity() {
    let k = kernel();
    let embedder = HashEmbedder;
    k.memory_store(
        "p",
        "OAuth refresh tokens need buffer",
        MemoryStoreOptions::default(),
        &embedder,
    )
    .unwrap();
    k.memory_store(
        "p",
        "Cooking recipes for pasta",
        MemoryStoreOptions::default(),
        &embedder,
    )
    .unwrap();

    let hits = k
        .memory_find("p", "token refresh", &MemoryFindOptions::default(), &embedder)
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits[0].memory.content.starts_with("OAuth"));

    // With the threshold dropped, both come back, scores descending, all
    // from the vector path.
    let hits = k
        .memory_find(
            "p",
            "token refresh",
            &MemoryFindOptions {
                threshold: 0.0,
                ..Default::default()
            },
            &embedder,
        )
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].score > hits[1].score);
    assert!(hits
        .iter()
        .all(|h| h.match_type == hive_kernel::MatchType::Vector));
}

#[test]
fn memory_falls_back_to_fts_when_embedder_is_down() {
    let k = kernel();
    k.memory_store(
        "p",
        "Deployment requires the staging gate",
        MemoryStoreOptions::default(),
        &HashEmbedder,
    )
    .unwrap();

    let hits = k
        .memory_find(
            "p",
            "staging gate",
            &MemoryFindOptions::default(),
            &DownEmbedder,
        )
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].match_type, hive_kernel::MatchType::Fts);

    // Storing still fails loudly.
    let err = k
        .memory_store("p", "x", MemoryStoreOptions::default(), &DownEmbedder)
        .unwrap_err();
    assert!(matches!(err, KernelError::Unavailable(_)));
}

#[test]
fn memory_lifecycle_and_validation() {
    let k = kernel();
    let embedder = HashEmbedder;
    let id = k
        .memory_store(
            "p",
            "watch the flaky integration suite",
            MemoryStoreOptions {
                collection: "ops".into(),
                confidence: 0.9,
                ..Default::default()
            },
            &embedder,
        )
        .unwrap();
    assert!(id.starts_with("mem_"));

    let memory = k.memory_get(&id).unwrap();
    assert_eq!(memory.collection, "ops");
    assert!(memory.validated_at.is_none());

    k.memory_validate("p", &id).unwrap();
    assert!(k.memory_get(&id).unwrap().validated_at.is_some());

    let err = k.memory_validate("p", "mem_missing").unwrap_err();
    assert!(matches!(err, KernelError::NotFound(_)));

    let stats = k.memory_stats("p").unwrap();
    assert_eq!(stats.total, 1);

    k.memory_remove("p", &id).unwrap();
    assert!(matches!(
        k.memory_get(&id).unwrap_err(),
        KernelError::NotFound(_)
    ));
    // The embedding row went with it.
    let left = k
        .db()
        .query("SELECT COUNT(*) AS n FROM memory_vectors", &[])
        .unwrap();
    assert_eq!(left[0].get_i64("n").unwrap(), 0);
}

#[test]
fn confidence_out_of_bounds_is_invalid() {
    let k = kernel();
    let err = k
        .memory_store(
            "p",
            "x",
            MemoryStoreOptions {
                confidence: 1.5,
                ..Default::default()
            },
            &HashEmbedder,
        )
        .unwrap_err();
    assert!(matches!(err, KernelError::Invalid(_)));
}

#[test]
fn export_import_round_trips_issues() {
    let dir = tempfile::tempdir().unwrap();
    let hive = dir.path().join(".hive");

    let k = kernel();
    let open = k.create_bead("p", "open task", CreateBeadOptions::default()).unwrap();
    let done = k
        .create_bead(
            "p",
            "finished task",
            CreateBeadOptions {
                priority: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
    k.close_bead("p", &done.id, Some("shipped")).unwrap();

    let written = hive_kernel::export_issues(&k, "p", &hive).unwrap();
    assert_eq!(written, 2);
    // Everything exported: the next export is a no-op.
    assert_eq!(hive_kernel::export_issues(&k, "p", &hive).unwrap(), 0);

    let fresh = kernel();
    let imported =
        hive_kernel::import_issues(&fresh, "p", &hive.join("issues.jsonl")).unwrap();
    assert_eq!(imported, 2);

    let restored = fresh.get_bead("p", &done.id).unwrap();
    assert_eq!(restored.status, BeadStatus::Closed);
    assert_eq!(restored.closed_reason.as_deref(), Some("shipped"));
    let restored_open = fresh.get_bead("p", &open.id).unwrap();
    assert_eq!(restored_open.status, BeadStatus::Open);

    // Importing the same file again creates nothing new.
    assert_eq!(
        hive_kernel::import_issues(&fresh, "p", &hive.join("issues.jsonl")).unwrap(),
        0
    );
}

#[test]
fn projects_are_isolated() {
    let k = kernel();
    k.create_bead("alpha", "a-task", CreateBeadOptions::default()).unwrap();
    k.create_bead("beta", "b-task", CreateBeadOptions::default()).unwrap();

    assert_eq!(k.query_beads("alpha", &BeadFilter::default()).unwrap().len(), 1);
    assert_eq!(k.query_beads("beta", &BeadFilter::default()).unwrap().len(), 1);
    assert_eq!(k.latest_sequence(Some("alpha")).unwrap(), 1);
    assert_eq!(k.latest_sequence(None).unwrap(), 2);
}

//! # Lifecycle Tier Tests (L0-L4)
//!
//! End-to-end behaviour of the engine through its public facade.
//!
//! ## Tiers
//! - L0: Deletion and status closure
//! - L1: Item versioning
//! - L2: Set composition and deduplication
//! - L3: Set publishing and retraction
//! - L4: Persistence

use csgraph_core::{
    Collection, CsGraphError, Deletion, Engine, Key, PublishConflict, SectionDocument, Session,
    SetDocument, Status,
};
use serde_json::{Value, json};

// =============================================================================
// FIXTURES
// =============================================================================

fn info(threshold: f64) -> Value {
    json!({
        "type": "LUT", "threshold": threshold,
        "labels": ["Energy", "Cross Section"], "units": ["eV", "m^2"],
        "data": [[1.0, 2.0e-20], [10.0, 4.0e-20]]
    })
}

fn reaction(electron: &str, target: &str) -> Value {
    json!({
        "lhs": [{ "count": 1, "state": electron }, { "count": 1, "state": target }],
        "rhs": [{ "count": 1, "state": electron }, { "count": 1, "state": target }],
        "reversible": false,
        "typeTags": ["Elastic"]
    })
}

fn section_doc(electron: &str, target: &str, threshold: f64) -> SectionDocument {
    serde_json::from_value(json!({
        "contributor": "Lab",
        "states": {
            electron: { "particle": "e", "charge": -1 },
            target: { "particle": "Ar", "charge": 0 }
        },
        "reaction": reaction(electron, target),
        "info": info(threshold)
    }))
    .expect("section document")
}

fn set_doc(name: &str, threshold: f64) -> SetDocument {
    serde_json::from_value(json!({
        "contributor": "Lab",
        "name": name,
        "description": "elastic scattering",
        "complete": false,
        "states": {
            "e": { "particle": "e", "charge": -1 },
            "Ar": { "particle": "Ar", "charge": 0 }
        },
        "processes": [{ "reaction": reaction("e", "Ar"), "info": [info(threshold)] }]
    }))
    .expect("set document")
}

fn with_member_key(mut doc: SetDocument, key: &Key) -> SetDocument {
    doc.processes[0].info[0].key = Some(key.clone());
    doc
}

fn only_member(engine: &Engine, set: &Key) -> Key {
    let members = engine.members(set).expect("members");
    assert_eq!(members.len(), 1);
    members[0].clone()
}

fn section_status(engine: &Engine, key: &Key) -> Status {
    engine
        .section_view(key)
        .expect("section")
        .version_info
        .status
}

fn set_status(engine: &Engine, key: &Key) -> Status {
    engine.set_view(key).expect("set").version_info.status
}

fn count(engine: &Engine, collection: Collection) -> usize {
    engine.stats().expect("stats").collections[collection.as_str()]
}

// =============================================================================
// TIER L0: DELETION AND STATUS CLOSURE
// =============================================================================

mod l0_status_closure {
    use super::*;

    /// Items in each of the four statuses.
    fn one_of_each(engine: &mut Engine) -> [(Status, Key); 4] {
        let draft = engine
            .create_section(&section_doc("e", "Ar", 0.0), Status::Draft, None)
            .expect("draft");
        let published = engine
            .create_section(&section_doc("e", "Ar", 1.0), Status::Published, None)
            .expect("published");

        let archived = engine
            .create_section(&section_doc("e", "Ar", 2.0), Status::Published, None)
            .expect("to archive");
        let successor = engine
            .update_section(&archived, &section_doc("e", "Ar", 2.5), None)
            .expect("successor");
        engine.publish_section(&successor).expect("publish successor");

        let retracted = engine
            .create_section(&section_doc("e", "Ar", 3.0), Status::Published, None)
            .expect("to retract");
        engine
            .delete_section(&retracted, Some("wrong units"))
            .expect("retract");

        [
            (Status::Draft, draft),
            (Status::Published, published),
            (Status::Archived, archived),
            (Status::Retracted, retracted),
        ]
    }

    /// L0.1: Deleting a missing key is a no-op, twice over.
    #[test]
    fn delete_missing_is_idempotent() {
        let mut engine = Engine::default();
        let missing = Key::from("4242");
        for _ in 0..2 {
            assert_eq!(
                engine.delete_section(&missing, None).expect("delete"),
                Deletion::Missing
            );
            assert_eq!(
                engine.delete_set(&missing, Some("x")).expect("delete"),
                Deletion::Missing
            );
        }
    }

    /// L0.2: Deleting a draft twice has the effect of deleting it once.
    #[test]
    fn delete_draft_twice() {
        let mut engine = Engine::default();
        let key = engine
            .create_section(&section_doc("e", "Ar", 0.0), Status::Draft, None)
            .expect("create");
        assert_eq!(engine.delete_section(&key, None).expect("first"), Deletion::Removed);
        let after_first = engine.hash().expect("hash");
        assert_eq!(engine.delete_section(&key, None).expect("second"), Deletion::Missing);
        assert_eq!(engine.hash().expect("hash"), after_first);
    }

    /// L0.3: Only the transitions of the state machine succeed.
    #[test]
    fn transitions_are_closed() {
        let mut engine = Engine::default();
        let items = one_of_each(&mut engine);
        for (status, key) in &items {
            assert_eq!(section_status(&engine, key), *status);
        }
        let doc = section_doc("e", "Ar", 9.0);

        for (status, key) in items {
            let update = engine.update_section(&key, &doc, None);
            let publish = engine.publish_section(&key);
            match status {
                Status::Draft => {
                    assert_eq!(update.expect("edit in place"), key);
                    assert!(publish.is_ok());
                }
                Status::Published => {
                    assert_ne!(update.expect("branch"), key);
                    assert!(matches!(publish, Err(CsGraphError::InvalidStatus { .. })));
                }
                Status::Archived | Status::Retracted => {
                    assert!(matches!(update, Err(CsGraphError::InvalidStatus { .. })));
                    assert!(matches!(publish, Err(CsGraphError::InvalidStatus { .. })));
                    assert!(matches!(
                        engine.delete_section(&key, Some("again")),
                        Err(CsGraphError::InvalidStatus { .. })
                    ));
                }
            }
        }
    }
}

// =============================================================================
// TIER L1: ITEM VERSIONING
// =============================================================================

mod l1_item_versioning {
    use super::*;

    /// L1.1: A published item has at most one draft at a time.
    #[test]
    fn second_draft_conflicts() {
        let mut engine = Engine::default();
        let key = engine
            .create_section(&section_doc("e", "Ar", 0.0), Status::Published, None)
            .expect("create");
        let draft = engine
            .update_section(&key, &section_doc("e", "Ar", 1.0), Some("first".to_string()))
            .expect("first draft");

        let err = engine
            .update_section(&key, &section_doc("e", "Ar", 2.0), Some("second".to_string()))
            .expect_err("second draft");
        assert_eq!(
            err,
            CsGraphError::DraftConflict {
                id: csgraph_core::NodeId {
                    collection: Collection::CrossSection,
                    key: key.clone(),
                },
                draft: draft.clone(),
            }
        );

        // Once the draft is published, the new head may be edited again.
        engine.publish_section(&draft).expect("publish");
        assert!(engine
            .update_section(&draft, &section_doc("e", "Ar", 3.0), None)
            .is_ok());
    }

    /// L1.2: Publishing a draft archives its predecessor; history is newest first.
    #[test]
    fn publish_archives_predecessor() {
        let mut engine = Engine::default();
        let a = engine
            .create_section(&section_doc("e", "Ar", 0.0), Status::Published, None)
            .expect("create");
        let a2 = engine
            .update_section(&a, &section_doc("e", "Ar", 1.0), Some("rescaled".to_string()))
            .expect("draft");
        assert_eq!(engine.publish_section(&a2).expect("publish"), Some(a.clone()));

        assert_eq!(section_status(&engine, &a), Status::Archived);
        assert_eq!(section_status(&engine, &a2), Status::Published);

        let history = engine.history_of_section(&a2).expect("history");
        let listed: Vec<(Key, Status, u32)> = history
            .into_iter()
            .map(|h| (h.key, h.version_info.status, h.version_info.version))
            .collect();
        assert_eq!(
            listed,
            vec![(a2.clone(), Status::Published, 2), (a.clone(), Status::Archived, 1)]
        );
        assert_eq!(engine.active_section_of_archived(&a).expect("active"), Some(a2));
    }

    /// L1.3: Drafts are not visible through the public views.
    #[test]
    fn drafts_are_private() {
        let mut engine = Engine::default();
        let key = engine
            .create_section(&section_doc("e", "Ar", 0.0), Status::Draft, None)
            .expect("create");
        assert!(matches!(
            engine.public_section(&key),
            Err(CsGraphError::NotFound(_))
        ));
        engine.publish_section(&key).expect("publish");
        assert!(engine.public_section(&key).is_ok());
    }

    /// L1.4: Items with the same reaction through different aliases share it.
    #[test]
    fn reaction_is_reused_across_aliases() {
        let mut engine = Engine::default();
        engine
            .create_section(&section_doc("e", "Ar", 0.0), Status::Published, None)
            .expect("first");
        engine
            .create_section(&section_doc("electron", "argon", 5.0), Status::Published, None)
            .expect("second");

        assert_eq!(count(&engine, Collection::CrossSection), 2);
        assert_eq!(count(&engine, Collection::Reaction), 1);
        assert_eq!(count(&engine, Collection::State), 2);
    }
}

// =============================================================================
// TIER L2: SET COMPOSITION AND DEDUPLICATION
// =============================================================================

mod l2_set_composition {
    use super::*;

    /// L2.1: Re-saving a set unchanged creates no new items, reactions or states.
    #[test]
    fn resave_round_trip_is_stable() {
        let mut engine = Engine::default();
        let v1 = engine
            .create_set(&set_doc("Argon", 0.0), Status::Published, None)
            .expect("create");
        let item = only_member(&engine, &v1);
        let reactions = count(&engine, Collection::Reaction);
        let states = count(&engine, Collection::State);

        let mut doc = engine.set_document(&v1).expect("document");
        assert_eq!(doc.processes[0].info[0].key, Some(item.clone()));
        doc.description = "elastic scattering, revised text".to_string();

        let v2 = engine
            .update_set(&v1, &doc, Some("text".to_string()))
            .expect("update");
        assert_ne!(v2, v1);
        assert_eq!(only_member(&engine, &v2), item);
        assert_eq!(count(&engine, Collection::CrossSection), 1);
        assert_eq!(count(&engine, Collection::Reaction), reactions);
        assert_eq!(count(&engine, Collection::State), states);

        let again = engine.set_document(&v2).expect("document");
        assert_eq!(again.processes[0].info[0].key, Some(item));
    }

    /// L2.2: Changing a member's content produces a draft of that member.
    #[test]
    fn changed_member_gets_draft() {
        let mut engine = Engine::default();
        let v1 = engine
            .create_set(&set_doc("Argon", 0.0), Status::Published, None)
            .expect("create");
        let item = only_member(&engine, &v1);

        let v2 = engine
            .update_set(&v1, &with_member_key(set_doc("Argon", 15.7), &item), None)
            .expect("update");
        let draft = only_member(&engine, &v2);
        assert_ne!(draft, item);
        assert_eq!(section_status(&engine, &draft), Status::Draft);
        assert_eq!(section_status(&engine, &item), Status::Published);
        assert_eq!(only_member(&engine, &v1), item);
    }

    /// L2.3: Ownership follows organization membership.
    #[test]
    fn owner_lists_sets() {
        let mut engine = Engine::default();
        let key = engine
            .create_set(&set_doc("Argon", 0.0), Status::Published, None)
            .expect("create");
        engine.add_member("ann@lab.example", "Lab").expect("member");
        engine.add_user("bob@elsewhere.example").expect("user");

        assert!(engine.is_owner(&key, "ann@lab.example").expect("owner"));
        assert!(!engine.is_owner(&key, "bob@elsewhere.example").expect("owner"));
        let owned = engine.list_owned("ann@lab.example").expect("owned");
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].key, key);
    }
}

// =============================================================================
// TIER L3: SET PUBLISHING AND RETRACTION
// =============================================================================

mod l3_set_publishing {
    use super::*;

    /// L3.1: A shared item survives until its last set is retracted.
    #[test]
    fn shared_item_retract_safety() {
        let mut engine = Engine::default();
        let s1 = engine
            .create_set(&set_doc("S1", 0.0), Status::Published, None)
            .expect("s1");
        let x = only_member(&engine, &s1);
        let s2 = engine
            .create_set(&with_member_key(set_doc("S2", 0.0), &x), Status::Published, None)
            .expect("s2");
        assert_eq!(only_member(&engine, &s2), x);

        engine.delete_set(&s1, Some("superseded")).expect("retract s1");
        assert_eq!(set_status(&engine, &s1), Status::Retracted);
        assert_eq!(section_status(&engine, &x), Status::Published);

        engine.delete_set(&s2, Some("superseded")).expect("retract s2");
        assert_eq!(section_status(&engine, &x), Status::Retracted);
    }

    /// L3.2: Publishing is refused when another set still uses a predecessor.
    #[test]
    fn cross_set_publish_guard() {
        let mut engine = Engine::default();
        let s1 = engine
            .create_set(&set_doc("S1", 0.0), Status::Published, None)
            .expect("s1");
        let i = only_member(&engine, &s1);
        let s3 = engine
            .create_set(&with_member_key(set_doc("S3", 0.0), &i), Status::Published, None)
            .expect("s3");

        let s2 = engine
            .update_set(&s1, &with_member_key(set_doc("S1", 7.0), &i), None)
            .expect("s2");
        let i2 = only_member(&engine, &s2);
        let before = engine.hash().expect("hash");

        let err = engine.publish_set(&s2).expect_err("publish");
        assert_eq!(
            err,
            CsGraphError::PublishConflict(vec![PublishConflict {
                item: i2.clone(),
                predecessor: i.clone(),
                sets: vec![s3.clone()],
            }])
        );
        assert_eq!(engine.publishing_conflicts(&s2).expect("conflicts").len(), 1);
        assert_eq!(engine.hash().expect("hash"), before);
        assert_eq!(set_status(&engine, &s1), Status::Published);
        assert_eq!(set_status(&engine, &s2), Status::Draft);
        assert_eq!(section_status(&engine, &i), Status::Published);
        assert_eq!(section_status(&engine, &i2), Status::Draft);

        // Retracting the other user clears the way.
        engine.delete_set(&s3, Some("merged")).expect("retract s3");
        let outcome = engine.publish_set(&s2).expect("publish");
        assert_eq!(outcome.archived_set, Some(s1.clone()));
        assert_eq!(outcome.archived_items, vec![i.clone()]);
        assert_eq!(section_status(&engine, &i2), Status::Published);
        assert_eq!(engine.active_set_of_archived(&s1).expect("active"), Some(s2));
    }

    /// L3.3: Removing a draft set drops its exclusive content.
    #[test]
    fn draft_set_removal() {
        let mut engine = Engine::default();
        let key = engine
            .create_set(&set_doc("Draft", 0.0), Status::Draft, None)
            .expect("create");
        assert_eq!(engine.delete_set(&key, None).expect("delete"), Deletion::Removed);
        assert_eq!(count(&engine, Collection::CrossSectionSet), 0);
        assert_eq!(count(&engine, Collection::CrossSection), 0);
        assert_eq!(count(&engine, Collection::Reaction), 0);
        assert_eq!(engine.prune().expect("prune").total(), 0);
    }

    /// L3.4: A set created as published publishes the drafts its keyed members became.
    #[test]
    fn published_create_publishes_changed_members() {
        let mut engine = Engine::default();
        let x = engine
            .create_section(&section_doc("e", "Ar", 0.0), Status::Published, None)
            .expect("section");

        let key = engine
            .create_set(&with_member_key(set_doc("Argon", 4.0), &x), Status::Published, None)
            .expect("create");
        let member = only_member(&engine, &key);
        assert_ne!(member, x);
        assert_eq!(set_status(&engine, &key), Status::Published);
        assert_eq!(section_status(&engine, &member), Status::Published);
        assert_eq!(section_status(&engine, &x), Status::Archived);
        assert!(engine.publishing_conflicts(&key).expect("conflicts").is_empty());
    }

    /// L3.5: A published create is refused, and leaves nothing behind, when the
    /// predecessor of a changed member is still used by another live set.
    #[test]
    fn published_create_respects_publish_guard() {
        let mut engine = Engine::default();
        let s1 = engine
            .create_set(&set_doc("S1", 0.0), Status::Published, None)
            .expect("s1");
        let i = only_member(&engine, &s1);
        let before = engine.hash().expect("hash");
        let sets = count(&engine, Collection::CrossSectionSet);
        let sections = count(&engine, Collection::CrossSection);

        let err = engine
            .create_set(&with_member_key(set_doc("S2", 7.0), &i), Status::Published, None)
            .expect_err("create");
        assert!(matches!(
            &err,
            CsGraphError::PublishConflict(conflicts)
                if conflicts.len() == 1 && conflicts[0].predecessor == i && conflicts[0].sets == [s1.clone()]
        ));
        assert_eq!(engine.hash().expect("hash"), before);
        assert_eq!(count(&engine, Collection::CrossSectionSet), sets);
        assert_eq!(count(&engine, Collection::CrossSection), sections);
        assert_eq!(section_status(&engine, &i), Status::Published);
        assert_eq!(only_member(&engine, &s1), i);

        // As a draft the same upload goes through and waits for the guard.
        let s2 = engine
            .create_set(&with_member_key(set_doc("S2", 7.0), &i), Status::Draft, None)
            .expect("draft");
        assert_eq!(section_status(&engine, &only_member(&engine, &s2)), Status::Draft);
        assert_eq!(engine.publishing_conflicts(&s2).expect("conflicts").len(), 1);
    }

    /// L3.6: New sets start as drafts or published, nothing else.
    #[test]
    fn create_rejects_closed_status() {
        let mut engine = Engine::default();
        for status in [Status::Archived, Status::Retracted] {
            assert!(matches!(
                engine.create_set(&set_doc("Closed", 0.0), status, None),
                Err(CsGraphError::Validation(_))
            ));
        }
        assert_eq!(count(&engine, Collection::CrossSectionSet), 0);
    }
}

// =============================================================================
// TIER L4: PERSISTENCE
// =============================================================================

mod l4_persistence {
    use super::*;
    use tempfile::tempdir;

    /// L4.1: The redb backend keeps data across sessions.
    #[test]
    fn redb_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("csgraph.redb");

        let key = {
            let mut engine = Engine::new(Session::with_redb(&path).expect("open"));
            engine
                .create_set(&set_doc("Argon", 0.0), Status::Published, None)
                .expect("create")
        };

        let engine = Engine::new(Session::with_redb(&path).expect("reopen"));
        assert!(engine.session().is_persistent());
        assert_eq!(engine.public_set(&key).expect("set").document.name, "Argon");
        assert_eq!(engine.members(&key).expect("members").len(), 1);
    }

    /// L4.2: A refused operation leaves the redb store unchanged.
    #[test]
    fn redb_rolls_back_refused_publish() {
        let dir = tempdir().expect("tempdir");
        let mut engine =
            Engine::new(Session::with_redb(dir.path().join("db.redb")).expect("open"));
        let s1 = engine
            .create_set(&set_doc("S1", 0.0), Status::Published, None)
            .expect("s1");
        let i = only_member(&engine, &s1);
        engine
            .create_set(&with_member_key(set_doc("S3", 0.0), &i), Status::Published, None)
            .expect("s3");
        let s2 = engine
            .update_set(&s1, &with_member_key(set_doc("S1", 7.0), &i), None)
            .expect("s2");

        let before = engine.hash().expect("hash");
        assert!(engine.publish_set(&s2).is_err());
        assert_eq!(engine.hash().expect("hash"), before);
    }

    /// L4.3: The in-memory and redb backends build the same graph.
    #[test]
    fn backends_agree() {
        let dir = tempdir().expect("tempdir");
        let mut memory = Engine::default();
        let mut disk = Engine::new(Session::with_redb(dir.path().join("db.redb")).expect("open"));
        let mut keys = Vec::new();
        for engine in [&mut memory, &mut disk] {
            let key = engine
                .create_set(&set_doc("Argon", 0.0), Status::Draft, None)
                .expect("create");
            engine.publish_set(&key).expect("publish");
            keys.push(key);
        }
        assert_eq!(keys[0], keys[1]);
        assert_eq!(memory.stats().expect("stats"), disk.stats().expect("stats"));
        assert_eq!(
            memory.set_document(&keys[0]).expect("document"),
            disk.set_document(&keys[1]).expect("document")
        );
    }
}

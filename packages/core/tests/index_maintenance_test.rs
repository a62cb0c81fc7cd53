//! Lookup-Document Maintenance Tests
//!
//! Verifies the lookup documents backing indexed fields: creation on
//! save, movement on value change, purge on remove, exclusivity under
//! competing owners, and the `find_by` resolution path.

#[cfg(test)]
mod index_maintenance_tests {
    use anyhow::Result;
    use docmap_core::db::Store;
    use docmap_core::services::{FindOptions, RemoveOptions, SaveOptions};
    use docmap_core::{
        Config, EventKind, FieldDescriptor, KeyOptions, MemoryStore, Odm, OdmError, Schema,
        SchemaOptions,
    };
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    fn setup() -> (Arc<MemoryStore>, Odm) {
        let store = Arc::new(MemoryStore::new());
        let odm = Odm::new(store.clone());
        (store, odm)
    }

    fn user_schema() -> Schema {
        let mut schema = Schema::with_options(SchemaOptions {
            key_prefix: Some("user::".to_string()),
            delimiter: Some("::".to_string()),
            ..Default::default()
        });
        schema.add(FieldDescriptor::string("name"));
        schema.add(FieldDescriptor::string("email").indexed());
        schema
    }

    #[tokio::test]
    async fn save_creates_lookup_pointing_at_generated_id() -> Result<()> {
        let (store, odm) = setup();
        let users = odm.define("User", user_schema())?;

        let mut doc = users.create_from(json!({"email": "a@b"}));
        doc.save(&SaveOptions::default()).await?;
        let id = doc.key_value().unwrap();

        let lookup = store.peek("user::$_ref_by_email::a@b").unwrap();
        assert_eq!(lookup, json!({ "key": id }));
        Ok(())
    }

    #[tokio::test]
    async fn changing_an_indexed_value_moves_the_lookup() -> Result<()> {
        let (store, odm) = setup();
        let users = odm.define("User", user_schema())?;

        let mut doc = users.create_from(json!({"email": "a@b"}));
        doc.save(&SaveOptions::default()).await?;

        doc.set("email", json!("c@d"));
        doc.save(&SaveOptions {
            wait_for_index: Some(true),
            ..Default::default()
        })
        .await?;

        assert!(store.peek("user::$_ref_by_email::a@b").is_none());
        let lookup = store.peek("user::$_ref_by_email::c@d").unwrap();
        assert_eq!(lookup["key"], doc.key_value().unwrap());
        Ok(())
    }

    #[tokio::test]
    async fn remove_purges_all_lookup_entries() -> Result<()> {
        let (store, odm) = setup();
        let users = odm.define("User", user_schema())?;

        let mut doc = users.create_from(json!({"email": "a@b"}));
        doc.save(&SaveOptions::default()).await?;
        assert_eq!(store.len(), 2);

        doc.remove(&RemoveOptions::default()).await?;
        assert!(store.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn lean_remove_skips_index_purge() -> Result<()> {
        let (store, odm) = setup();
        let users = odm.define("User", user_schema())?;

        let mut doc = users.create_from(json!({"email": "a@b"}));
        doc.save(&SaveOptions::default()).await?;

        doc.remove(&RemoveOptions {
            lean: true,
            remove_refs: false,
        })
        .await?;

        assert!(store.peek("user::$_ref_by_email::a@b").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn competing_saves_leave_last_writer_owning_the_lookup() -> Result<()> {
        let (store, odm) = setup();
        let users = odm.define("User", user_schema())?;

        let mut first = users.create_from(json!({"email": "shared@x"}));
        first.save(&SaveOptions::default()).await?;
        let mut second = users.create_from(json!({"email": "shared@x"}));
        second.save(&SaveOptions::default()).await?;

        let lookup = store.peek("user::$_ref_by_email::shared@x").unwrap();
        assert_eq!(lookup["key"], second.key_value().unwrap());

        // The first document walking away from the value must not delete
        // a lookup it no longer owns.
        first.set("email", json!("other@x"));
        first
            .save(&SaveOptions {
                wait_for_index: Some(true),
                ..Default::default()
            })
            .await?;

        let lookup = store.peek("user::$_ref_by_email::shared@x").unwrap();
        assert_eq!(lookup["key"], second.key_value().unwrap());
        Ok(())
    }

    #[tokio::test]
    async fn indexed_arrays_expand_per_element() -> Result<()> {
        let (store, odm) = setup();
        let mut schema = Schema::new();
        schema.add(FieldDescriptor::string("name").key_with(KeyOptions::provided()));
        schema.add(FieldDescriptor::array_of("tags", FieldDescriptor::string("tag")).indexed());
        let posts = odm.define("Post", schema)?;

        let mut doc = posts.create_from(json!({"name": "p1", "tags": ["a", "b"]}));
        doc.save(&SaveOptions::default()).await?;
        assert_eq!(store.peek("$_ref_by_tag_a").unwrap()["key"], json!("p1"));
        assert_eq!(store.peek("$_ref_by_tag_b").unwrap()["key"], json!("p1"));

        doc.set("tags", json!(["b", "c"]));
        doc.save(&SaveOptions {
            wait_for_index: Some(true),
            ..Default::default()
        })
        .await?;

        assert!(store.peek("$_ref_by_tag_a").is_none());
        assert!(store.peek("$_ref_by_tag_b").is_some());
        assert!(store.peek("$_ref_by_tag_c").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn find_by_resolves_through_the_lookup() -> Result<()> {
        let (_store, odm) = setup();
        let users = odm.define("User", user_schema())?;

        let mut doc = users.create_from(json!({"name": "Ann", "email": "a@b"}));
        doc.save(&SaveOptions::default()).await?;

        let found = users
            .find_by("email", &json!("a@b"), &FindOptions::default())
            .await?
            .expect("lookup should resolve");
        assert_eq!(found.get("name"), Some(json!("Ann")));

        let missing = users
            .find_by("email", &json!("nobody@x"), &FindOptions::default())
            .await?;
        assert!(missing.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn find_by_rejects_unindexed_fields() -> Result<()> {
        let (_store, odm) = setup();
        let users = odm.define("User", user_schema())?;

        let err = users
            .find_by("name", &json!("Ann"), &FindOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OdmError::UnknownIndex { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn dangling_lookup_resolves_empty_or_errors_per_config() -> Result<()> {
        // Default config: dangling lookups resolve empty.
        let (_store, odm) = setup();
        let users = odm.define("User", user_schema())?;
        let mut doc = users.create_from(json!({"email": "a@b"}));
        doc.save(&SaveOptions::default()).await?;
        doc.remove(&RemoveOptions {
            lean: true,
            remove_refs: false,
        })
        .await?;

        assert!(users
            .find_by("email", &json!("a@b"), &FindOptions::default())
            .await?
            .is_none());

        // Strict config: the same situation is a dangling-index error.
        let store = Arc::new(MemoryStore::new());
        let odm = Odm::with_config(
            store.clone(),
            Config {
                error_on_missing_index: true,
                ..Default::default()
            },
        );
        let users = odm.define("User", user_schema())?;
        let mut doc = users.create_from(json!({"email": "a@b"}));
        doc.save(&SaveOptions::default()).await?;
        doc.remove(&RemoveOptions {
            lean: true,
            remove_refs: false,
        })
        .await?;

        let err = users
            .find_by("email", &json!("a@b"), &FindOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OdmError::DanglingIndex { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_index_value_fails_save_only_with_wait_for_index() -> Result<()> {
        let (store, odm) = setup();
        // Default "_" delimiter; an indexed value containing it cannot
        // form a lookup key.
        let mut schema = Schema::new();
        schema.add(FieldDescriptor::string("name").key_with(KeyOptions::provided()));
        schema.add(FieldDescriptor::string("handle").indexed());
        let users = odm.define("User", schema)?;

        let mut doc = users.create_from(json!({"name": "bob", "handle": "bad_handle"}));
        let err = doc
            .save(&SaveOptions {
                wait_for_index: Some(true),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OdmError::IndexFailed(_)));
        // The primary write itself went through.
        assert!(store.peek("bob").is_some());

        // Without wait_for_index the save succeeds and the failure is
        // reported through the index event.
        let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let mut doc = users.create_from(json!({"name": "alice", "handle": "also_bad"}));
        let sink = seen.clone();
        doc.on(EventKind::Index, move |event| {
            if let docmap_core::DocumentEvent::Indexed { error } = event {
                sink.lock().unwrap().push(error.clone());
            }
        });
        doc.save(&SaveOptions::default()).await?;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_some());
        Ok(())
    }

    #[tokio::test]
    async fn explicit_index_recreates_deleted_lookups() -> Result<()> {
        let (store, odm) = setup();
        let users = odm.define("User", user_schema())?;

        let mut doc = users.create_from(json!({"email": "a@b"}));
        doc.save(&SaveOptions::default()).await?;

        store
            .remove("user::$_ref_by_email::a@b", None)
            .await
            .unwrap();
        assert!(store.peek("user::$_ref_by_email::a@b").is_none());

        doc.index().await?;
        let lookup = store.peek("user::$_ref_by_email::a@b").unwrap();
        assert_eq!(lookup["key"], doc.key_value().unwrap());
        Ok(())
    }

    #[tokio::test]
    async fn lookups_work_without_atomic_lock() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let odm = Odm::with_config(
            store.clone(),
            Config {
                atomic_lock: false,
                ..Default::default()
            },
        );
        let users = odm.define("User", user_schema())?;

        let mut doc = users.create_from(json!({"email": "a@b"}));
        doc.save(&SaveOptions {
            wait_for_index: Some(true),
            ..Default::default()
        })
        .await?;

        doc.set("email", json!("c@d"));
        doc.save(&SaveOptions {
            wait_for_index: Some(true),
            ..Default::default()
        })
        .await?;

        assert!(store.peek("user::$_ref_by_email::a@b").is_none());
        assert!(store.peek("user::$_ref_by_email::c@d").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn stored_full_reference_id_lookups_resolve() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let odm = Odm::with_config(
            store.clone(),
            Config {
                store_full_reference_id: true,
                ..Default::default()
            },
        );
        let users = odm.define("User", user_schema())?;

        let mut doc = users.create_from(json!({"name": "Ann", "email": "a@b"}));
        doc.save(&SaveOptions::default()).await?;
        let id = doc.key_value().unwrap();

        // The lookup carries the fully expanded storage key.
        let lookup = store.peek("user::$_ref_by_email::a@b").unwrap();
        assert_eq!(
            lookup["key"],
            Value::String(format!("user::{}", id.as_str().unwrap()))
        );

        let found = users
            .find_by("email", &json!("a@b"), &FindOptions::default())
            .await?
            .expect("lookup should resolve");
        assert_eq!(found.key_value().unwrap(), id);
        Ok(())
    }
}

//! Embedded Document Tests
//!
//! The save/remove graph over model-typed fields: depth-first child
//! saves, abort-on-child-failure, scalar/hydrated equivalence, and
//! reachable-set removal.

#[cfg(test)]
mod embedded_documents_tests {
    use anyhow::Result;
    use docmap_core::models::{pre_sync, HookError};
    use docmap_core::services::{FindOptions, RemoveOptions, SaveOptions};
    use docmap_core::{FieldDescriptor, KeyOptions, MemoryStore, Odm, OdmError, Schema};
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryStore>, Odm) {
        let store = Arc::new(MemoryStore::new());
        let odm = Odm::new(store.clone());
        (store, odm)
    }

    fn company_schema() -> Schema {
        let mut schema = Schema::new();
        schema.add(FieldDescriptor::string("code").key_with(KeyOptions::provided()));
        schema.add(FieldDescriptor::string("title"));
        schema
    }

    fn user_schema() -> Schema {
        let mut schema = Schema::new();
        schema.add(FieldDescriptor::string("name").key_with(KeyOptions::provided()));
        schema.add(FieldDescriptor::reference("employer", "Company"));
        schema.add(FieldDescriptor::array_of(
            "clients",
            FieldDescriptor::reference("client", "Company"),
        ));
        schema
    }

    #[tokio::test]
    async fn saving_a_parent_saves_each_hydrated_child_once() -> Result<()> {
        let (store, odm) = setup();
        let companies = odm.define("Company", company_schema())?;
        let users = odm.define("User", user_schema())?;

        let mut doc = users.create_from(json!({"name": "ann"}));
        doc.set_document(
            "employer",
            companies.create_from(json!({"code": "c1", "title": "Acme"})),
        );
        doc.push_document(
            "clients",
            companies.create_from(json!({"code": "c2", "title": "Globex"})),
        );
        doc.push_document(
            "clients",
            companies.create_from(json!({"code": "c3", "title": "Initech"})),
        );

        doc.save(&SaveOptions::default()).await?;

        // Three children plus the parent, nothing else.
        assert_eq!(store.len(), 4);
        assert_eq!(store.peek("c1").unwrap()["title"], json!("Acme"));

        // Children hold their post-save CAS tokens.
        assert!(doc.get_document("employer").unwrap().cas().is_some());
        for child in doc.get_documents("clients") {
            assert!(child.cas().is_some());
        }

        // The parent body references children by key.
        let body = store.peek("ann").unwrap();
        assert_eq!(body["employer"], json!("c1"));
        assert_eq!(body["clients"], json!(["c2", "c3"]));
        Ok(())
    }

    #[tokio::test]
    async fn scalar_and_hydrated_references_persist_identically() -> Result<()> {
        let (store, odm) = setup();
        let companies = odm.define("Company", company_schema())?;
        let users = odm.define("User", user_schema())?;

        let mut acme = companies.create_from(json!({"code": "c1", "title": "Acme"}));
        acme.save(&SaveOptions::default()).await?;

        let mut hydrated = users.create_from(json!({"name": "a"}));
        hydrated.set_document("employer", acme.clone());
        hydrated.save(&SaveOptions::default()).await?;

        let mut scalar = users.create_from(json!({"name": "b", "employer": "c1"}));
        scalar.save(&SaveOptions::default()).await?;

        assert_eq!(
            store.peek("a").unwrap()["employer"],
            store.peek("b").unwrap()["employer"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn child_hook_failure_aborts_the_parent_save() -> Result<()> {
        let (store, odm) = setup();
        let good = odm.define("Company", company_schema())?;

        let mut broken_schema = Schema::new();
        broken_schema.add(FieldDescriptor::string("code").key_with(KeyOptions::provided()));
        broken_schema.pre("save", pre_sync(|_| Err(HookError::new("child refuses"))));
        let broken = odm.define("Broken", broken_schema)?;

        let mut parent_schema = Schema::new();
        parent_schema.add(FieldDescriptor::string("name").key_with(KeyOptions::provided()));
        parent_schema.add(FieldDescriptor::reference("first", "Company"));
        parent_schema.add(FieldDescriptor::reference("second", "Broken"));
        let parents = odm.define("Parent", parent_schema)?;

        let mut doc = parents.create_from(json!({"name": "p1"}));
        doc.set_document("first", good.create_from(json!({"code": "ok-child"})));
        doc.set_document("second", broken.create_from(json!({"code": "bad-child"})));

        let err = doc.save(&SaveOptions::default()).await.unwrap_err();
        assert!(matches!(err, OdmError::Middleware(_)));

        // The earlier sibling was saved and is not rolled back; the
        // parent itself never hit the store.
        assert!(store.peek("ok-child").is_some());
        assert!(store.peek("bad-child").is_none());
        assert!(store.peek("p1").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn remove_refs_removes_the_reachable_set_once() -> Result<()> {
        let (store, odm) = setup();
        let companies = odm.define("Company", company_schema())?;
        let users = odm.define("User", user_schema())?;

        let mut acme = companies.create_from(json!({"code": "c1", "title": "Acme"}));
        acme.save(&SaveOptions::default()).await?;
        let mut globex = companies.create_from(json!({"code": "c2", "title": "Globex"}));
        globex.save(&SaveOptions::default()).await?;

        // Same company reachable through two paths.
        let mut doc = users.create_from(json!({
            "name": "ann",
            "employer": "c1",
            "clients": ["c1", "c2"]
        }));
        doc.save(&SaveOptions::default()).await?;
        assert_eq!(store.len(), 3);

        doc.remove(&RemoveOptions {
            remove_refs: true,
            lean: false,
        })
        .await?;

        assert!(store.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn plain_remove_leaves_embedded_documents() -> Result<()> {
        let (store, odm) = setup();
        let companies = odm.define("Company", company_schema())?;
        let users = odm.define("User", user_schema())?;

        let mut acme = companies.create_from(json!({"code": "c1", "title": "Acme"}));
        acme.save(&SaveOptions::default()).await?;

        let mut doc = users.create_from(json!({"name": "ann", "employer": "c1"}));
        doc.save(&SaveOptions::default()).await?;

        doc.remove(&RemoveOptions::default()).await?;
        assert!(store.peek("ann").is_none());
        assert!(store.peek("c1").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn bulk_remove_by_id() -> Result<()> {
        let (store, odm) = setup();
        let users = odm.define("User", user_schema())?;

        for name in ["e1", "e2"] {
            let mut doc = users.create_from(json!({"name": name}));
            doc.save(&SaveOptions::default()).await?;
        }

        users
            .remove_by_id(
                &["e1".to_string(), "e2".to_string()],
                &RemoveOptions::default(),
            )
            .await?;

        assert!(users
            .find_by_id("e1", &FindOptions::default())
            .await?
            .is_none());
        assert!(users
            .find_by_id("e2", &FindOptions::default())
            .await?
            .is_none());
        assert!(store.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn lean_remove_treats_missing_documents_as_success() -> Result<()> {
        let (_store, odm) = setup();
        let users = odm.define("User", user_schema())?;

        let mut doc = users.create_from(json!({"name": "ghost"}));
        // Never saved; a lean remove of the missing key still succeeds.
        doc.remove(&RemoveOptions {
            lean: true,
            remove_refs: false,
        })
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn removing_an_unsaved_document_surfaces_not_found() -> Result<()> {
        let (_store, odm) = setup();
        let users = odm.define("User", user_schema())?;

        let mut doc = users.create_from(json!({"name": "ghost"}));
        let err = doc.remove(&RemoveOptions::default()).await.unwrap_err();
        assert!(matches!(
            err,
            OdmError::Store(docmap_core::StoreError::NotFound { .. })
        ));
        Ok(())
    }
}

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicI32, Ordering},
};

use docmodel::{backend::FindOptions, memory::InMemoryStore, prelude::*};
use regex::Regex;

fn lowercase(value: Bson) -> Bson {
    match value {
        Bson::String(s) => Bson::String(s.to_lowercase()),
        other => other,
    }
}

fn users() -> Model {
    Model::builder("users")
        .field(Field::string("name").required().min(1))
        .field(Field::string("email").required().unique().alias("mail").transform(lowercase))
        .field(Field::number("age").min(0).max(150))
        .field(Field::string("role").one_of(["admin", "user"]).default("user"))
        .field(Field::string("username").pattern(Regex::new("^[a-z]+$").unwrap()))
        .field(Field::string("accountId").immutable())
        .build()
}

fn store() -> DocumentStore<InMemoryStore> {
    let mut store = DocumentStore::new(InMemoryStore::new());
    store.register(users()).unwrap();
    store
}

#[tokio::test]
async fn save_reports_every_failed_constraint() {
    let store = store();
    let users = store.model("users").unwrap();

    let err = users
        .save(doc! { "age": 200, "role": "root", "username": "Not Valid" })
        .await
        .unwrap_err();

    match err {
        DocumentStoreError::Validation(errors) => {
            assert!(errors.has("name", ValidationCode::MissingRequired));
            assert!(errors.has("email", ValidationCode::MissingRequired));
            assert!(errors.has("age", ValidationCode::AboveMaximum));
            assert!(errors.has("role", ValidationCode::NotInEnum));
            assert!(errors.has("username", ValidationCode::PatternMismatch));
        },
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(users.count(doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn save_rejects_wrong_types_and_nulls() {
    let store = store();
    let users = store.model("users").unwrap();

    let err = users
        .save(doc! { "name": Bson::Null, "email": "a@b.c", "age": "old" })
        .await
        .unwrap_err();

    match err {
        DocumentStoreError::Validation(errors) => {
            assert!(errors.has("name", ValidationCode::NullNotAllowed));
            assert!(errors.has("age", ValidationCode::TypeMismatch));
        },
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn defaults_transforms_and_aliases_apply_on_save() {
    let store = store();
    let users = store.model("users").unwrap();

    let id = users
        .save(doc! { "name": "Alice", "email": "Alice@Example.COM" })
        .await
        .unwrap();
    let alice = users.find_by_id(id.clone(), &[]).await.unwrap().unwrap();

    assert_eq!(alice.get_str("email").unwrap(), "alice@example.com");
    assert_eq!(alice.get_str("role").unwrap(), "user");
    assert!(!alice.contains_key("mail"));

    let stored = store
        .backend()
        .find("users", doc! { "_id": id }, FindOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(stored[0].get_str("mail").unwrap(), "alice@example.com");
    assert!(!stored[0].contains_key("email"));

    let found = users
        .find_one(Filter::eq("email", "alice@example.com"), &[])
        .await
        .unwrap();
    assert!(found.is_some());
}

#[tokio::test]
async fn computed_defaults_run_once_per_save() {
    let counter = Arc::new(AtomicI32::new(0));
    let next = counter.clone();

    let mut store = DocumentStore::new(InMemoryStore::new());
    store
        .register(
            Model::builder("tickets")
                .field(Field::string("title").required())
                .field(Field::number("seq").default_with(move || Bson::Int32(next.fetch_add(1, Ordering::SeqCst) + 1)))
                .build(),
        )
        .unwrap();
    let tickets = store.model("tickets").unwrap();

    let first = tickets.save(doc! { "title": "a" }).await.unwrap();
    let second = tickets.save(doc! { "title": "b" }).await.unwrap();
    tickets.save(doc! { "title": "c", "seq": 99 }).await.unwrap();

    let first = tickets.find_by_id(first, &[]).await.unwrap().unwrap();
    let second = tickets.find_by_id(second, &[]).await.unwrap().unwrap();

    assert_eq!(first.get_i32("seq").unwrap(), 1);
    assert_eq!(second.get_i32("seq").unwrap(), 2);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unique_fields_reject_duplicates() {
    let store = store();
    let users = store.model("users").unwrap();

    users
        .save(doc! { "name": "Alice", "email": "alice@example.com" })
        .await
        .unwrap();
    let err = users
        .save(doc! { "name": "Other", "email": "ALICE@example.com" })
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::DuplicateKey { ref collection, .. } if collection == "users"));
    assert_eq!(users.count(doc! {}).await.unwrap(), 1);
}

#[tokio::test]
async fn immutable_fields_cannot_change() {
    let store = store();
    let users = store.model("users").unwrap();

    let id = users
        .save(doc! { "name": "Alice", "email": "a@b.c", "accountId": "acc-1" })
        .await
        .unwrap();

    users
        .save(doc! { "_id": id.clone(), "name": "Alicia", "email": "a@b.c", "accountId": "acc-1" })
        .await
        .unwrap();

    let err = users
        .save(doc! { "_id": id.clone(), "name": "Alicia", "email": "a@b.c", "accountId": "acc-2" })
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::ImmutableField { ref field, .. } if field == "accountId"));

    let err = users
        .update_by_id(id.clone(), doc! { "accountId": "acc-3" })
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::ImmutableField { .. }));

    let stored = users.find_by_id(id, &[]).await.unwrap().unwrap();
    assert_eq!(stored.get_str("name").unwrap(), "Alicia");
    assert_eq!(stored.get_str("accountId").unwrap(), "acc-1");
}

#[tokio::test]
async fn conditional_immutability_follows_the_stored_document() {
    let mut store = DocumentStore::new(InMemoryStore::new());
    store
        .register(
            Model::builder("orders")
                .field(Field::string("status").required())
                .field(Field::number("total").immutable_when(|doc| matches!(doc.get_str("status"), Ok("paid"))))
                .build(),
        )
        .unwrap();
    let orders = store.model("orders").unwrap();

    let id = orders
        .save(doc! { "status": "open", "total": 10 })
        .await
        .unwrap();
    orders
        .update_by_id(id.clone(), doc! { "total": 12 })
        .await
        .unwrap();
    orders
        .update_by_id(id.clone(), doc! { "status": "paid", "total": 14 })
        .await
        .unwrap();

    let stored = orders.find_by_id(id.clone(), &[]).await.unwrap().unwrap();
    assert_eq!(stored.get_str("status").unwrap(), "paid");
    assert_eq!(stored.get_i32("total").unwrap(), 14);

    let err = orders
        .update_by_id(id.clone(), doc! { "total": 15 })
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::ImmutableField { ref field, .. } if field == "total"));

    let err = orders
        .save(doc! { "_id": id.clone(), "total": 16 })
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::ImmutableField { ref field, .. } if field == "total"));

    orders
        .save(doc! { "_id": id.clone(), "status": "paid", "total": 14 })
        .await
        .unwrap();
}

#[tokio::test]
async fn bulk_updates_reject_immutable_fields_before_writing() {
    let store = store();
    let users = store.model("users").unwrap();

    users
        .save(doc! { "name": "A", "email": "a@x.io", "accountId": "acc-1" })
        .await
        .unwrap();
    users
        .save(doc! { "name": "B", "email": "b@x.io", "accountId": "acc-2" })
        .await
        .unwrap();

    let err = users
        .update(Filter::eq("role", "user"), doc! { "accountId": "acc-3", "age": 30 })
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::ImmutableField { ref field, document_id: Some(_) } if field == "accountId"));

    assert_eq!(users.count(Filter::eq("accountId", "acc-3")).await.unwrap(), 0);
    assert_eq!(users.count(Filter::eq("age", 30)).await.unwrap(), 0);
}

#[tokio::test]
async fn saving_by_id_keeps_fields_it_does_not_carry() {
    let mut store = DocumentStore::new(InMemoryStore::new());
    store
        .register(
            Model::builder("members")
                .field(Field::string("name").required())
                .field(Field::string("role").one_of(["admin", "user"]).default("user"))
                .plugin(SoftDelete::new())
                .build(),
        )
        .unwrap();
    let members = store.model("members").unwrap();

    let id = members
        .save(doc! { "name": "A", "role": "admin" })
        .await
        .unwrap();
    members.soft_delete_by_id(id.clone()).await.unwrap();

    members
        .save(doc! { "_id": id.clone(), "name": "B" })
        .await
        .unwrap();

    let all = members.query().with_deleted().execute().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].get_str("name").unwrap(), "B");
    assert_eq!(all[0].get_str("role").unwrap(), "admin");
    assert!(all[0].get_datetime("deletedAt").is_ok());
    assert!(members.find_by_id(id, &[]).await.unwrap().is_none());
}

#[tokio::test]
async fn saving_an_unknown_id_fails_without_writing() {
    let store = store();
    let users = store.model("users").unwrap();

    let err = users
        .save(doc! { "_id": ObjectId::new(), "name": "Ghost", "email": "ghost@x.io" })
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::DocumentNotFound(..)));
    assert_eq!(users.count(doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn update_hooks_see_the_id_and_the_persisted_document() {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let (before, after) = (log.clone(), log.clone());

    let mut store = DocumentStore::new(InMemoryStore::new());
    store
        .register(
            Model::builder("tickets")
                .field(Field::string("kind").required())
                .field(Field::string("note"))
                .hook(HookPhase::PreUpdate, hook_fn(move |doc| {
                    before.lock().unwrap().push(format!("pre:{}:{}", doc.contains_key("_id"), doc.contains_key("kind")));
                    Ok(())
                }))
                .hook(HookPhase::PostUpdate, hook_fn(move |doc| {
                    after.lock().unwrap().push(format!(
                        "post:{}:{}",
                        doc.get_str("kind").unwrap_or("-"),
                        doc.get_str("note").unwrap_or("-"),
                    ));
                    Ok(())
                }))
                .build(),
        )
        .unwrap();
    let tickets = store.model("tickets").unwrap();

    let id = tickets
        .save(doc! { "kind": "bug", "note": "x" })
        .await
        .unwrap();
    tickets
        .save(doc! { "_id": id, "note": "y" })
        .await
        .unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["pre:true:false", "post:bug:y"]);
}

#[tokio::test]
async fn updates_validate_and_count_modified_documents() {
    let store = store();
    let users = store.model("users").unwrap();

    for (name, email) in [("A", "a@x.io"), ("B", "b@x.io"), ("C", "c@x.io")] {
        users.save(doc! { "name": name, "email": email }).await.unwrap();
    }

    let modified = users
        .update(Filter::eq("role", "user"), doc! { "role": "admin" })
        .await
        .unwrap();
    assert_eq!(modified, 3);
    assert_eq!(users.count(Filter::eq("role", "admin")).await.unwrap(), 3);

    let err = users
        .update(Filter::eq("name", "A"), doc! { "age": -1 })
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::Validation(ref errors) if errors.has("age", ValidationCode::BelowMinimum)));

    let err = users
        .update_by_id(ObjectId::new(), doc! { "name": "Z" })
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::DocumentNotFound(..)));
}

#[tokio::test]
async fn model_validators_see_the_whole_document() {
    let mut store = DocumentStore::new(InMemoryStore::new());
    store
        .register(
            Model::builder("ranges")
                .field(Field::number("start").required())
                .field(Field::number("end").required())
                .validator(validator_fn(|doc| {
                    match (doc.get_i32("start"), doc.get_i32("end")) {
                        (Ok(start), Ok(end)) if end < start => Err(("end".to_string(), "end precedes start".to_string())),
                        _ => Ok(()),
                    }
                }))
                .build(),
        )
        .unwrap();
    let ranges = store.model("ranges").unwrap();

    ranges.save(doc! { "start": 1, "end": 2 }).await.unwrap();
    let err = ranges
        .save(doc! { "start": 5, "end": 2 })
        .await
        .unwrap_err();

    assert!(matches!(err, DocumentStoreError::Validation(ref errors) if errors.has("end", ValidationCode::Custom)));
}

#[tokio::test]
async fn hooks_run_in_registration_order_and_abort_writes() {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let (first, second, after) = (log.clone(), log.clone(), log.clone());

    let mut store = DocumentStore::new(InMemoryStore::new());
    store
        .register(
            Model::builder("events")
                .field(Field::string("kind").required())
                .hook(HookPhase::PreSave, hook_fn(move |doc| {
                    first.lock().unwrap().push("first".to_string());
                    doc.insert("stamped", true);
                    Ok(())
                }))
                .hook(HookPhase::PreSave, hook_fn(move |doc| {
                    second.lock().unwrap().push(format!("second:{}", doc.get_bool("stamped").unwrap_or(false)));
                    Ok(())
                }))
                .hook(HookPhase::PostSave, hook_fn(move |doc| {
                    after.lock().unwrap().push(format!("post:{}", doc.contains_key("_id")));
                    Ok(())
                }))
                .build(),
        )
        .unwrap();
    store
        .register(
            Model::builder("locked")
                .field(Field::string("kind"))
                .hook(HookPhase::PreSave, hook_fn(|_| Err(DocumentStoreError::InvalidDocument("locked".to_string()))))
                .build(),
        )
        .unwrap();

    let id = store
        .model("events")
        .unwrap()
        .save(doc! { "kind": "login" })
        .await
        .unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["first", "second:true", "post:true"]);
    let saved = store.model("events").unwrap().find_by_id(id, &[]).await.unwrap().unwrap();
    assert!(saved.get_bool("stamped").unwrap());

    let locked = store.model("locked").unwrap();
    let err = locked.save(doc! { "kind": "x" }).await.unwrap_err();

    assert!(matches!(err, DocumentStoreError::HookExecution { phase: HookPhase::PreSave, .. }));
    assert_eq!(locked.count(doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn failing_post_hooks_leave_the_write_committed() {
    let mut store = DocumentStore::new(InMemoryStore::new());
    store
        .register(
            Model::builder("audits")
                .field(Field::string("action").required())
                .hook(HookPhase::PostSave, hook_fn(|_| Err(DocumentStoreError::Unknown("audit sink down".to_string()))))
                .build(),
        )
        .unwrap();
    let audits = store.model("audits").unwrap();

    let err = audits.save(doc! { "action": "login" }).await.unwrap_err();

    match err {
        DocumentStoreError::HookExecution { phase, document, .. } => {
            assert_eq!(phase, HookPhase::PostSave);
            assert!(document.contains_key("_id"));
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(audits.count(doc! {}).await.unwrap(), 1);
}

#[tokio::test]
async fn timestamps_are_maintained() {
    let mut store = DocumentStore::new(InMemoryStore::new());
    store
        .register(
            Model::builder("notes")
                .field(Field::string("text"))
                .plugin(Timestamps::new())
                .build(),
        )
        .unwrap();
    let notes = store.model("notes").unwrap();

    let id = notes.save(doc! { "text": "a" }).await.unwrap();
    let created = notes.find_by_id(id.clone(), &[]).await.unwrap().unwrap();
    assert!(created.get_datetime("createdAt").is_ok());

    notes.update_by_id(id.clone(), doc! { "text": "b" }).await.unwrap();
    let updated = notes.find_by_id(id, &[]).await.unwrap().unwrap();

    assert_eq!(updated.get_datetime("createdAt").unwrap(), created.get_datetime("createdAt").unwrap());
    assert!(updated.get_datetime("updatedAt").unwrap() >= created.get_datetime("updatedAt").unwrap());
}

#[tokio::test]
async fn soft_deleted_documents_are_hidden_until_restored() {
    let mut store = DocumentStore::new(InMemoryStore::new());
    store
        .register(
            Model::builder("notes")
                .field(Field::string("text"))
                .plugin(SoftDelete::new())
                .build(),
        )
        .unwrap();
    let notes = store.model("notes").unwrap();

    let id = notes.save(doc! { "text": "a" }).await.unwrap();
    notes.save(doc! { "text": "b" }).await.unwrap();

    notes.soft_delete_by_id(id.clone()).await.unwrap();
    assert_eq!(notes.find(doc! {}, &[]).await.unwrap().len(), 1);
    assert_eq!(notes.count(doc! {}).await.unwrap(), 1);
    assert_eq!(notes.query().with_deleted().execute().await.unwrap().len(), 2);
    assert!(notes.find_by_id(id.clone(), &[]).await.unwrap().is_none());

    notes.restore_by_id(id.clone()).await.unwrap();
    assert!(notes.find_by_id(id, &[]).await.unwrap().is_some());
}

#[tokio::test]
async fn aborted_transactions_discard_writes() {
    let store = store();
    store.sync_all().await.unwrap();

    let session = store.start_session().await.unwrap();
    store.start_transaction(session).await.unwrap();
    store
        .model("users")
        .unwrap()
        .with_session(session)
        .save(doc! { "name": "Ghost", "email": "ghost@x.io" })
        .await
        .unwrap();
    store.abort_transaction(session).await.unwrap();

    let session_two = store.start_session().await.unwrap();
    store.start_transaction(session_two).await.unwrap();
    store
        .model("users")
        .unwrap()
        .with_session(session_two)
        .save(doc! { "name": "Kept", "email": "kept@x.io" })
        .await
        .unwrap();
    store.commit_transaction(session_two).await.unwrap();

    store.end_session(session).await.unwrap();
    store.end_session(session_two).await.unwrap();

    let users = store.model("users").unwrap();
    assert_eq!(users.count(doc! {}).await.unwrap(), 1);
    assert!(users.find_one(Filter::eq("name", "Kept"), &[]).await.unwrap().is_some());
}

use docmodel::{memory::InMemoryStore, prelude::*};

fn store() -> DocumentStore<InMemoryStore> {
    let mut store = DocumentStore::new(InMemoryStore::new());

    store
        .register(
            Model::builder("users")
                .field(Field::string("name").required())
                .field(Field::object_id("managerId"))
                .relationship("manager", RelationshipDescriptor::one_to_one("users", "managerId"))
                .field(Field::relationship("posts", RelationshipDescriptor::one_to_many("posts", "author").cascade()))
                .relationship(
                    "groups",
                    RelationshipDescriptor::many_to_many("groups", Junction::between("memberships", "user", "group"))
                        .cascade(),
                )
                .build(),
        )
        .unwrap();
    store
        .register(
            Model::builder("posts")
                .field(Field::string("title").required())
                .field(Field::object_id("author").required().alias("authorId"))
                .relationship("writer", RelationshipDescriptor::one_to_one("users", "author").inverse("posts"))
                .build(),
        )
        .unwrap();
    store
        .register(
            Model::builder("groups")
                .field(Field::string("name").required())
                .build(),
        )
        .unwrap();
    store
        .register(
            Model::builder("memberships")
                .field(Field::object_id("userId").required())
                .field(Field::object_id("groupId").required())
                .build(),
        )
        .unwrap();

    store
}

#[tokio::test]
async fn populates_single_and_collection_relationships() {
    let store = store();
    let users = store.model("users").unwrap();
    let posts = store.model("posts").unwrap();

    let boss = users.save(doc! { "name": "Boss" }).await.unwrap();
    let alice = users
        .save(doc! { "name": "Alice", "managerId": boss.clone() })
        .await
        .unwrap();
    posts
        .save(doc! { "title": "Hello", "author": alice.clone() })
        .await
        .unwrap();
    posts
        .save(doc! { "title": "Again", "author": alice.clone() })
        .await
        .unwrap();

    let populated = users
        .find_by_id(alice.clone(), &["posts", "manager"])
        .await
        .unwrap()
        .unwrap();

    let written = populated.get_array("posts").unwrap();
    let titles: Vec<&str> = written
        .iter()
        .filter_map(|post| post.as_document())
        .filter_map(|post| post.get_str("title").ok())
        .collect();
    assert_eq!(titles, vec!["Hello", "Again"]);
    let first = written[0].as_document().unwrap();
    assert_eq!(first.get("author"), Some(&alice));
    assert!(!first.contains_key("authorId"));
    assert_eq!(populated.get_document("manager").unwrap().get_str("name").unwrap(), "Boss");

    let boss = users
        .find_by_id(boss, &["posts", "manager"])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(boss.get_array("posts").unwrap().len(), 0);
    assert_eq!(boss.get("manager"), Some(&Bson::Null));
}

#[tokio::test]
async fn populates_through_a_junction_collection() {
    let store = store();
    let users = store.model("users").unwrap();
    let groups = store.model("groups").unwrap();
    let memberships = store.model("memberships").unwrap();

    let alice = users.save(doc! { "name": "Alice" }).await.unwrap();
    let bob = users.save(doc! { "name": "Bob" }).await.unwrap();
    let admins = groups.save(doc! { "name": "admins" }).await.unwrap();
    let staff = groups.save(doc! { "name": "staff" }).await.unwrap();

    for group in [admins, staff] {
        memberships
            .save(doc! { "userId": alice.clone(), "groupId": group })
            .await
            .unwrap();
    }

    let alice = users.find_by_id(alice, &["groups"]).await.unwrap().unwrap();
    let mut names: Vec<&str> = alice
        .get_array("groups")
        .unwrap()
        .iter()
        .filter_map(|group| group.as_document())
        .filter_map(|group| group.get_str("name").ok())
        .collect();
    names.sort();

    assert_eq!(names, vec!["admins", "staff"]);
    assert!(!alice.contains_key("__groups_junction"));

    let bob = users.find_by_id(bob, &["groups"]).await.unwrap().unwrap();
    assert_eq!(bob.get_array("groups").unwrap().len(), 0);
}

#[tokio::test]
async fn populated_queries_keep_filters_and_projection() {
    let store = store();
    let users = store.model("users").unwrap();
    let posts = store.model("posts").unwrap();

    let alice = users.save(doc! { "name": "Alice" }).await.unwrap();
    users.save(doc! { "name": "Bob" }).await.unwrap();
    posts
        .save(doc! { "title": "Hello", "author": alice })
        .await
        .unwrap();

    let results = users
        .query()
        .filter(Filter::eq("name", "Alice"))
        .select(&["name"])
        .populate(&["posts"])
        .execute()
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].get_str("name").unwrap(), "Alice");
    assert_eq!(results[0].get_array("posts").unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_populate_names_are_skipped() {
    let store = store();
    let users = store.model("users").unwrap();

    let id = users.save(doc! { "name": "Alice" }).await.unwrap();
    let alice = users.find_by_id(id, &["nothing"]).await.unwrap().unwrap();

    assert!(!alice.contains_key("nothing"));
}

#[tokio::test]
async fn references_to_missing_documents_are_rejected() {
    let store = store();
    let posts = store.model("posts").unwrap();
    let users = store.model("users").unwrap();

    let err = posts
        .save(doc! { "title": "Orphan", "author": ObjectId::new() })
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::ForeignKeyViolation { ref field, .. } if field == "author"));

    let err = users
        .save(doc! { "name": "Alice", "managerId": ObjectId::new() })
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::ForeignKeyViolation { ref field, .. } if field == "managerId"));

    assert_eq!(posts.count(doc! {}).await.unwrap(), 0);
    assert_eq!(users.count(doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn deletes_cascade_to_dependents() {
    let store = store();
    let users = store.model("users").unwrap();
    let posts = store.model("posts").unwrap();
    let groups = store.model("groups").unwrap();
    let memberships = store.model("memberships").unwrap();

    let alice = users.save(doc! { "name": "Alice" }).await.unwrap();
    let bob = users.save(doc! { "name": "Bob" }).await.unwrap();
    let staff = groups.save(doc! { "name": "staff" }).await.unwrap();

    posts.save(doc! { "title": "a", "author": alice.clone() }).await.unwrap();
    posts.save(doc! { "title": "b", "author": alice.clone() }).await.unwrap();
    posts.save(doc! { "title": "c", "author": bob.clone() }).await.unwrap();
    memberships
        .save(doc! { "userId": alice.clone(), "groupId": staff.clone() })
        .await
        .unwrap();
    memberships
        .save(doc! { "userId": bob.clone(), "groupId": staff })
        .await
        .unwrap();

    users.delete_by_id(alice.clone()).await.unwrap();

    assert_eq!(posts.count(doc! {}).await.unwrap(), 1);
    assert_eq!(posts.count(Filter::eq("author", bob)).await.unwrap(), 1);
    assert_eq!(memberships.count(doc! {}).await.unwrap(), 1);
    assert_eq!(groups.count(doc! {}).await.unwrap(), 1);

    let err = users.delete_by_id(alice).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::DocumentNotFound(..)));
}

use docmodel::{memory::InMemoryStore, prelude::*};
use serde::Deserialize;

#[derive(Debug, Deserialize, PartialEq)]
struct Item {
    name: String,
    n: i32,
}

async fn store_with_items(count: i32) -> DocumentStore<InMemoryStore> {
    let mut store = DocumentStore::new(InMemoryStore::new());
    store
        .register(
            Model::builder("items")
                .field(Field::string("name").required())
                .field(Field::number("n").required().alias("num"))
                .field(Field::array("tags"))
                .build(),
        )
        .unwrap();
    store
        .register(
            Model::builder("orders")
                .field(Field::string("product").required())
                .field(Field::number("quantity").required())
                .field(Field::number("price").required())
                .build(),
        )
        .unwrap();

    let items = store.model("items").unwrap();
    for n in 1..=count {
        let tags = if n % 2 == 0 { vec!["even"] } else { vec!["odd"] };
        items
            .save(doc! { "name": format!("item-{n:02}"), "n": n, "tags": tags })
            .await
            .unwrap();
    }

    store
}

fn numbers(documents: &[Document]) -> Vec<i32> {
    documents
        .iter()
        .map(|document| document.get_i32("n").unwrap())
        .collect()
}

#[tokio::test]
async fn paginates_sorted_results() {
    let store = store_with_items(25).await;
    let items = store.model("items").unwrap();

    let page = items
        .query()
        .sort_by("n", SortDirection::Asc)
        .paginate(2, 10)
        .execute_page()
        .await
        .unwrap();

    assert_eq!(numbers(&page.items), (11..=20).collect::<Vec<_>>());
    assert_eq!(page.count, 25);
    assert_eq!(page.next_page, Some(3));
    assert_eq!(page.previous_page, Some(1));

    let last = items
        .query()
        .sort_by("n", SortDirection::Asc)
        .paginate(3, 10)
        .execute_page()
        .await
        .unwrap();

    assert_eq!(numbers(&last.items), (21..=25).collect::<Vec<_>>());
    assert_eq!(last.next_page, None);
}

#[tokio::test]
async fn combines_conditions() {
    let store = store_with_items(10).await;
    let items = store.model("items").unwrap();

    let results = items
        .query()
        .where_field("n", FieldOp::GreaterThan, 3)
        .where_op("n", "lessThanOrEqual", 8)
        .unwrap()
        .filter(Filter::any_of("tags", vec!["even"]))
        .sort_by("n", SortDirection::Desc)
        .execute()
        .await
        .unwrap();
    assert_eq!(numbers(&results), vec![8, 6, 4]);

    let results = items
        .query()
        .or([Filter::lt("n", 2), Filter::gte("n", 10)])
        .sort_by("n", SortDirection::Asc)
        .execute()
        .await
        .unwrap();
    assert_eq!(numbers(&results), vec![1, 10]);

    let results = items
        .query()
        .not(Filter::regex("name", "^item-0"))
        .execute()
        .await
        .unwrap();
    assert_eq!(numbers(&results), vec![10]);

    assert!(items.query().where_op("n", "near", 1).is_err());
}

#[tokio::test]
async fn projections_use_declared_names() {
    let store = store_with_items(3).await;
    let items = store.model("items").unwrap();

    let selected = items
        .query()
        .select(&["n"])
        .sort_by("n", SortDirection::Asc)
        .first()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(selected.get_i32("n").unwrap(), 1);
    assert!(selected.contains_key("_id"));
    assert!(!selected.contains_key("name"));

    let excluded = items
        .query()
        .exclude(&["tags"])
        .execute()
        .await
        .unwrap();

    assert!(excluded.iter().all(|item| !item.contains_key("tags") && item.contains_key("name")));
}

#[tokio::test]
async fn deserializes_results() {
    let store = store_with_items(2).await;

    let items: Vec<Item> = store
        .model("items")
        .unwrap()
        .query()
        .sort_by("n", SortDirection::Desc)
        .execute_as()
        .await
        .unwrap();

    assert_eq!(items, vec![
        Item { name: "item-02".to_string(), n: 2 },
        Item { name: "item-01".to_string(), n: 1 },
    ]);
}

#[tokio::test]
async fn counts_and_explains() {
    let store = store_with_items(6).await;
    let items = store.model("items").unwrap();

    let query = items.query().where_field("n", FieldOp::GreaterThanOrEqual, 4);

    assert_eq!(query.count().await.unwrap(), 3);

    let plan = query.explain().await.unwrap();
    assert!(plan.get_document("queryPlanner").is_ok());
    assert_eq!(plan.get_document("executionStats").unwrap().get_i64("nReturned").unwrap(), 3);
}

#[tokio::test]
async fn aggregates_grouped_totals() {
    let store = store_with_items(0).await;
    let orders = store.model("orders").unwrap();

    for (product, quantity, price) in [("Laptop", 2, 1000), ("Phone", 3, 500), ("Tablet", 1, 300)] {
        orders
            .save(doc! { "product": product, "quantity": quantity, "price": price })
            .await
            .unwrap();
    }

    let totals = orders
        .aggregate()
        .group(doc! { "_id": "$product", "total": { "$sum": { "$multiply": ["$quantity", "$price"] } } })
        .sort_stage(doc! { "total": -1 })
        .execute()
        .await
        .unwrap();

    assert_eq!(totals, vec![
        doc! { "_id": "Laptop", "total": 2000 },
        doc! { "_id": "Phone", "total": 1500 },
        doc! { "_id": "Tablet", "total": 300 },
    ]);

    let counted = orders
        .aggregate()
        .matching(doc! { "price": { "$gte": 500 } })
        .count_stage("expensive")
        .execute()
        .await
        .unwrap();
    assert_eq!(counted, vec![doc! { "expensive": 2 }]);
}

#[tokio::test]
async fn rejects_empty_and_unsupported_pipelines() {
    let store = store_with_items(1).await;
    let items = store.model("items").unwrap();

    let err = items.aggregate().execute().await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::Aggregation { ref pipeline, .. } if pipeline.is_empty()));

    let err = items
        .aggregate()
        .merge(doc! { "into": "elsewhere" })
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::Aggregation { .. }));
}

use std::time::Duration;

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use odmlayer::{async_trait, bson::DateTime, memory::InMemoryStore, prelude::*};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Model)]
struct Book {
    #[serde(flatten)]
    #[model(base)]
    base: DefaultModel,
    name: String,
    author: String,
    pages: i32,
}

impl ModelHooks for Book {}

fn book(name: &str, author: &str, pages: i32) -> Book {
    Book {
        name: name.to_string(),
        author: author.to_string(),
        pages,
        ..Default::default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Model)]
#[model(collection = "guarded_items")]
struct Guarded {
    #[serde(flatten)]
    base: IdField,
    label: String,
    #[serde(skip)]
    reject_create: bool,
    #[serde(skip)]
    fail_after_create: bool,
    #[serde(skip)]
    reject_update: bool,
    #[serde(skip)]
    fail_after_update: bool,
    #[serde(skip)]
    reject_delete: bool,
    #[serde(skip)]
    deleted: Option<u64>,
}

#[async_trait]
impl ModelHooks for Guarded {
    async fn before_create(&mut self, _ctx: &Ctx) -> OdmResult<()> {
        if self.reject_create {
            return Err(OdmError::hook("rejected"));
        }
        Ok(())
    }

    async fn after_create(&mut self, _ctx: &Ctx) -> OdmResult<()> {
        if self.fail_after_create {
            return Err(OdmError::hook("after create failed"));
        }
        Ok(())
    }

    async fn before_update(&mut self, _ctx: &Ctx) -> OdmResult<()> {
        if self.reject_update {
            return Err(OdmError::hook("update rejected"));
        }
        Ok(())
    }

    async fn after_update(&mut self, _ctx: &Ctx, _result: &UpdateResult) -> OdmResult<()> {
        if self.fail_after_update {
            return Err(OdmError::hook("after update failed"));
        }
        Ok(())
    }

    async fn before_delete(&mut self, _ctx: &Ctx) -> OdmResult<()> {
        if self.reject_delete {
            return Err(OdmError::hook("delete rejected"));
        }
        Ok(())
    }

    async fn after_delete(&mut self, _ctx: &Ctx, result: &DeleteResult) -> OdmResult<()> {
        self.deleted = Some(result.deleted_count);
        Ok(())
    }
}

#[derive(Debug, Deserialize, PartialEq)]
struct AuthorPages {
    #[serde(rename = "_id")]
    author: String,
    total: i64,
}

async fn seeded() -> ModelStore<InMemoryStore> {
    let store = ModelStore::new(InMemoryStore::new());
    let books = store.coll::<Book>();

    for mut item in [
        book("Dune", "Herbert", 412),
        book("Children of Dune", "Herbert", 444),
        book("Solaris", "Lem", 204),
    ] {
        books.create(&mut item).await.unwrap();
    }

    store
}

#[test]
fn collection_names() {
    assert_eq!(Book::collection_name(), "books");
    assert_eq!(Guarded::collection_name(), "guarded_items");
}

#[tokio::test]
async fn create_find_update_delete() {
    let store = ModelStore::new(InMemoryStore::new());
    let books = store.coll::<Book>();
    assert_eq!(books.name(), "books");

    let mut dune = book("Dune", "Herbert", 412);
    books.create(&mut dune).await.unwrap();

    let Bson::ObjectId(id) = dune.id() else {
        panic!("expected a generated ObjectId, got {:?}", dune.id());
    };
    assert_ne!(dune.base.created_at, DateTime::from_millis(0));
    assert_eq!(dune.base.created_at, dune.base.updated_at);

    let mut found = Book::default();
    books.find_by_id(id.to_hex(), &mut found, None).await.unwrap();
    assert_eq!(found, dune);

    found.pages = 604;
    books.update(&mut found).await.unwrap();
    assert!(found.base.updated_at >= found.base.created_at);

    let mut reloaded = Book::default();
    books.find_by_id(id, &mut reloaded, None).await.unwrap();
    assert_eq!(reloaded.pages, 604);
    assert_eq!(reloaded.base.created_at, dune.base.created_at);

    books.delete(&mut reloaded).await.unwrap();
    let err = books.find_by_id(id, &mut reloaded, None).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(books.count_documents(doc! {}, None).await.unwrap(), 0);
}

#[tokio::test]
async fn update_by_id_overwrites_the_target_document() {
    let store = seeded().await;
    let books = store.coll::<Book>();

    let mut solaris = Book::default();
    books.first(doc! { "name": "Solaris" }, &mut solaris, None).await.unwrap();

    let mut replacement = book("Solaris", "Stanislaw Lem", 204);
    books
        .update_by_id(solaris.id(), &mut replacement)
        .await
        .unwrap();
    assert_eq!(replacement.id(), solaris.id());

    let mut found = Book::default();
    books.find_by_id(solaris.id(), &mut found, None).await.unwrap();
    assert_eq!(found.author, "Stanislaw Lem");
    assert_eq!(books.count_documents(doc! {}, None).await.unwrap(), 3);
}

#[tokio::test]
async fn invalid_and_missing_ids() {
    let store = seeded().await;
    let books = store.coll::<Book>();
    let mut found = Book::default();

    let err = books.find_by_id("not-an-id", &mut found, None).await.unwrap_err();
    assert!(matches!(err, OdmError::InvalidId(_)));

    let err = books
        .first(doc! { "name": "Neuromancer" }, &mut found, None)
        .await
        .unwrap_err();
    match err {
        OdmError::DocumentNotFound(filter, collection) => {
            assert!(filter.contains("Neuromancer"));
            assert_eq!(collection, "books");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn failing_before_hook_prevents_the_write() {
    let store = ModelStore::new(InMemoryStore::new());
    let items = store.coll::<Guarded>();

    let mut item = Guarded {
        label: "blocked".into(),
        reject_create: true,
        ..Default::default()
    };
    let err = items.create(&mut item).await.unwrap_err();

    assert!(matches!(err, OdmError::Hook(message) if message == "rejected"));
    assert_eq!(item.id(), Bson::Null);
    assert_eq!(items.count_documents(doc! {}, None).await.unwrap(), 0);
}

#[tokio::test]
async fn failing_after_hook_keeps_the_write() {
    let store = ModelStore::new(InMemoryStore::new());
    let items = store.coll::<Guarded>();

    let mut item = Guarded {
        label: "kept".into(),
        fail_after_create: true,
        ..Default::default()
    };
    let err = items.create(&mut item).await.unwrap_err();

    assert!(matches!(err, OdmError::Hook(_)));
    assert!(matches!(item.id(), Bson::ObjectId(_)));
    assert_eq!(items.count_documents(doc! { "label": "kept" }, None).await.unwrap(), 1);

    items.delete(&mut item).await.unwrap();
    assert_eq!(item.deleted, Some(1));
}

#[tokio::test]
async fn failing_before_update_leaves_the_document_unchanged() {
    let store = ModelStore::new(InMemoryStore::new());
    let items = store.coll::<Guarded>();

    let mut item = Guarded {
        label: "original".into(),
        ..Default::default()
    };
    items.create(&mut item).await.unwrap();

    item.label = "changed".into();
    item.reject_update = true;
    let err = items.update(&mut item).await.unwrap_err();
    assert!(matches!(err, OdmError::Hook(message) if message == "update rejected"));

    let mut stored = Guarded::default();
    items.find_by_id(item.id(), &mut stored, None).await.unwrap();
    assert_eq!(stored.label, "original");
}

#[tokio::test]
async fn failing_after_update_keeps_the_write() {
    let store = ModelStore::new(InMemoryStore::new());
    let items = store.coll::<Guarded>();

    let mut item = Guarded {
        label: "original".into(),
        ..Default::default()
    };
    items.create(&mut item).await.unwrap();

    item.label = "changed".into();
    item.fail_after_update = true;
    let err = items.update(&mut item).await.unwrap_err();
    assert!(matches!(err, OdmError::Hook(message) if message == "after update failed"));

    let mut stored = Guarded::default();
    items.find_by_id(item.id(), &mut stored, None).await.unwrap();
    assert_eq!(stored.label, "changed");
}

#[tokio::test]
async fn failing_before_delete_keeps_the_document() {
    let store = ModelStore::new(InMemoryStore::new());
    let items = store.coll::<Guarded>();

    let mut item = Guarded {
        label: "kept".into(),
        ..Default::default()
    };
    items.create(&mut item).await.unwrap();

    item.reject_delete = true;
    let err = items.delete(&mut item).await.unwrap_err();

    assert!(matches!(err, OdmError::Hook(message) if message == "delete rejected"));
    assert_eq!(item.deleted, None);
    assert_eq!(items.count_documents(doc! {}, None).await.unwrap(), 1);
}

#[tokio::test]
async fn simple_find_replaces_results() {
    let store = seeded().await;
    let books = store.coll::<Book>();

    let mut results = vec![book("stale", "nobody", 1)];
    books
        .simple_find(
            &mut results,
            doc! { "author": "Herbert" },
            FindOptions {
                sort: Some(doc! { "pages": -1 }),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let names: Vec<_> = results.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, ["Children of Dune", "Dune"]);

    let raw: Vec<Document> = books
        .find(doc! { "pages": { operator::LT: 300 } }, None)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0].get_str("name").unwrap(), "Solaris");
}

#[tokio::test]
async fn simple_aggregate_mixes_builders_and_raw_stages() {
    let store = seeded().await;
    let books = store.coll::<Book>();

    let mut totals: Vec<AuthorPages> = Vec::new();
    books
        .simple_aggregate(
            &mut totals,
            [
                StageInput::from(builder::group("$author", Some(doc! { "total": { operator::SUM: "$pages" } }))),
                StageInput::from(doc! { operator::SORT: { "_id": 1 } }),
            ],
        )
        .await
        .unwrap();

    assert_eq!(
        totals,
        [
            AuthorPages { author: "Herbert".into(), total: 856 },
            AuthorPages { author: "Lem".into(), total: 204 },
        ]
    );
}

#[tokio::test]
async fn simple_aggregate_first_reports_presence() {
    let store = seeded().await;
    let books = store.coll::<Book>();

    let mut first = Book::default();
    let found = books
        .simple_aggregate_first(&mut first, [builder::match_(doc! { "author": "Borges" })])
        .await
        .unwrap();
    assert!(!found);
    assert_eq!(first, Book::default());

    let found = books
        .simple_aggregate_first(
            &mut first,
            [builder::sort(doc! { "pages": 1 }), builder::limit(1)],
        )
        .await
        .unwrap();
    assert!(found);
    assert_eq!(first.name, "Solaris");

    let names: Vec<Document> = books
        .simple_aggregate_cursor([builder::project(doc! { "_id": 0, "name": 1 })])
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(names.len(), 3);
    assert!(names.iter().all(|d| d.len() == 1));
}

#[tokio::test]
async fn insert_many_and_delete_many_skip_hooks() {
    let store = ModelStore::new(InMemoryStore::new());
    let items = store.coll::<Guarded>();

    let inserted = items
        .insert_many([doc! { "label": "a" }, doc! { "label": "b" }, doc! { "label": "c" }])
        .await
        .unwrap();
    assert_eq!(inserted.inserted_ids.len(), 3);

    let deleted = items
        .delete_many(doc! { "label": { operator::IN: ["a", "b"] } })
        .await
        .unwrap();
    assert_eq!(deleted.deleted_count, 2);

    let remaining = items.find_one(doc! {}, None).await.unwrap();
    assert_eq!(remaining.unwrap().get_str("label").unwrap(), "c");
}

#[tokio::test]
async fn cancelled_context_aborts_before_writing() {
    let store = ModelStore::new(InMemoryStore::new());
    let books = store.coll::<Book>();

    let (ctx, cancel) = Ctx::background().with_cancel();
    cancel.cancel();

    let mut dune = book("Dune", "Herbert", 412);
    let err = books.create_with_ctx(&ctx, &mut dune).await.unwrap_err();

    assert!(matches!(err, OdmError::Cancelled));
    assert_eq!(books.count_documents(doc! {}, None).await.unwrap(), 0);
}

#[tokio::test]
async fn store_context_uses_configured_timeout() {
    let store = ModelStore::with_config(InMemoryStore::new(), Config::with_ctx_timeout(Duration::from_secs(3)));

    let (ctx, _cancel) = store.ctx();
    let remaining = ctx.deadline().unwrap() - tokio::time::Instant::now();
    assert!(remaining <= Duration::from_secs(3));
    assert!(remaining > Duration::from_secs(2));
}

#[tokio::test]
async fn named_collection_shares_model_documents() {
    let store = seeded().await;

    let count = store
        .collection("books")
        .count_documents(doc! { "author": "Herbert" }, None)
        .await
        .unwrap();
    assert_eq!(count, 2);
}

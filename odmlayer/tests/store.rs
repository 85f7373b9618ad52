use std::time::Duration;

use serde::{Deserialize, Serialize};

use odmlayer::{async_trait, memory::InMemoryStore, prelude::*};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Model)]
struct Account {
    #[serde(flatten)]
    #[model(base)]
    base: IdField,
    owner: String,
    balance: i64,
}

impl ModelHooks for Account {}

fn account(owner: &str, balance: i64) -> Account {
    Account {
        owner: owner.to_string(),
        balance,
        ..Default::default()
    }
}

/// Delays every insert so deadlines can elapse mid-call.
#[derive(Debug, Default)]
struct SlowStore {
    inner: InMemoryStore,
    delay: Duration,
}

#[async_trait]
impl StoreBackend for SlowStore {
    async fn insert_one(&self, ctx: &Ctx, collection: &str, document: Document) -> OdmResult<Bson> {
        tokio::time::sleep(self.delay).await;
        self.inner.insert_one(ctx, collection, document).await
    }

    async fn insert_many(&self, ctx: &Ctx, collection: &str, documents: Vec<Document>) -> OdmResult<InsertManyResult> {
        self.inner.insert_many(ctx, collection, documents).await
    }

    async fn find_one(
        &self,
        ctx: &Ctx,
        collection: &str,
        filter: Document,
        options: FindOneOptions,
    ) -> OdmResult<Option<Document>> {
        self.inner.find_one(ctx, collection, filter, options).await
    }

    async fn find(&self, ctx: &Ctx, collection: &str, filter: Document, options: FindOptions) -> OdmResult<DocumentStream> {
        self.inner.find(ctx, collection, filter, options).await
    }

    async fn update_one(
        &self,
        ctx: &Ctx,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> OdmResult<UpdateResult> {
        self.inner.update_one(ctx, collection, filter, update, options).await
    }

    async fn delete_one(&self, ctx: &Ctx, collection: &str, filter: Document) -> OdmResult<DeleteResult> {
        self.inner.delete_one(ctx, collection, filter).await
    }

    async fn delete_many(&self, ctx: &Ctx, collection: &str, filter: Document) -> OdmResult<DeleteResult> {
        self.inner.delete_many(ctx, collection, filter).await
    }

    async fn count_documents(
        &self,
        ctx: &Ctx,
        collection: &str,
        filter: Document,
        options: CountOptions,
    ) -> OdmResult<u64> {
        self.inner.count_documents(ctx, collection, filter, options).await
    }

    async fn aggregate(
        &self,
        ctx: &Ctx,
        collection: &str,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    ) -> OdmResult<DocumentStream> {
        self.inner.aggregate(ctx, collection, pipeline, options).await
    }

    async fn shutdown(self) -> OdmResult<()> {
        self.inner.shutdown().await
    }
}

#[tokio::test]
async fn deadline_elapses_during_the_backend_call() {
    let store = ModelStore::with_config(
        SlowStore {
            inner: InMemoryStore::new(),
            delay: Duration::from_millis(500),
        },
        Config::with_ctx_timeout(Duration::from_millis(20)),
    );

    let mut acc = account("ada", 10);
    let err = store.coll::<Account>().create(&mut acc).await.unwrap_err();

    assert!(matches!(err, OdmError::Timeout(timeout) if timeout == Duration::from_millis(20)));
    assert_eq!(acc.id(), Bson::Null);
}

#[tokio::test]
async fn transactions_are_unsupported_by_default() {
    let store = ModelStore::new(SlowStore::default());

    let err = store
        .transaction(|tx| async move { tx.commit().await })
        .await
        .unwrap_err();

    assert!(matches!(err, OdmError::Unsupported(_)));
}

#[tokio::test]
async fn committed_transaction_keeps_writes() {
    let store = ModelStore::new(InMemoryStore::new());
    let db = &store;

    let id = db
        .transaction(|tx| async move {
            let mut acc = account("ada", 100);
            db.coll::<Account>().create_with_ctx(tx.ctx(), &mut acc).await?;
            tx.commit().await?;
            Ok::<_, OdmError>(acc.id())
        })
        .await
        .unwrap();

    let mut found = Account::default();
    store.coll::<Account>().find_by_id(id, &mut found, None).await.unwrap();
    assert_eq!(found.owner, "ada");
}

#[tokio::test]
async fn failed_transaction_is_rolled_back() {
    let store = ModelStore::new(InMemoryStore::new());
    let accounts = store.coll::<Account>();

    let mut existing = account("ada", 100);
    accounts.create(&mut existing).await.unwrap();

    let db = &store;
    let result: OdmResult<()> = db
        .transaction(|tx| async move {
            let accounts = db.coll::<Account>();

            let mut grace = account("grace", 50);
            accounts.create_with_ctx(tx.ctx(), &mut grace).await?;

            let mut ada = Account::default();
            accounts
                .first_with_ctx(tx.ctx(), doc! { "owner": "ada" }, &mut ada, None)
                .await?;
            ada.balance -= 500;
            accounts.update_with_ctx(tx.ctx(), &mut ada).await?;

            Err(OdmError::hook("insufficient funds"))
        })
        .await;

    assert!(matches!(result, Err(OdmError::Hook(_))));
    assert_eq!(accounts.count_documents(doc! {}, None).await.unwrap(), 1);

    let mut ada = Account::default();
    accounts.find_by_id(existing.id(), &mut ada, None).await.unwrap();
    assert_eq!(ada.balance, 100);
}

#[tokio::test]
async fn explicit_abort_discards_writes() {
    let store = ModelStore::new(InMemoryStore::new());
    let db = &store;

    db.transaction(|tx| async move {
        let mut acc = account("ada", 1);
        db.coll::<Account>().create_with_ctx(tx.ctx(), &mut acc).await?;
        tx.abort().await
    })
    .await
    .unwrap();

    assert_eq!(store.coll::<Account>().count_documents(doc! {}, None).await.unwrap(), 0);
}

#[tokio::test]
async fn seeded_store_and_shutdown() {
    let backend = InMemoryStore::builder()
        .seed("accounts", vec![doc! { "owner": "ada", "balance": 3_i64 }])
        .build()
        .unwrap();
    let store = ModelStore::new(backend.clone());

    let mut accounts: Vec<Account> = Vec::new();
    store
        .coll::<Account>()
        .simple_find(&mut accounts, doc! {}, None)
        .await
        .unwrap();
    assert_eq!(accounts.len(), 1);
    assert!(matches!(accounts[0].id(), Bson::ObjectId(_)));

    store.shutdown().await.unwrap();
    assert!(backend.documents("accounts").await.is_empty());
}

#[tokio::test]
async fn cancelled_context_does_not_start_a_transaction() {
    let store = ModelStore::new(InMemoryStore::new());
    let (ctx, cancel) = Ctx::background().with_cancel();
    cancel.cancel();

    let mut ran = false;
    let ran_ref = &mut ran;
    let err = store
        .transaction_with_ctx(&ctx, |_tx| async move {
            *ran_ref = true;
            Ok::<_, OdmError>(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, OdmError::Cancelled));
    assert!(!ran);
}

#[tokio::test]
async fn commit_after_cancellation_fails_and_rolls_back() {
    let store = ModelStore::new(InMemoryStore::new());
    let (ctx, cancel) = Ctx::background().with_cancel();

    let db = &store;
    let cancel = &cancel;
    let err = db
        .transaction_with_ctx(&ctx, |tx| async move {
            let mut acc = account("ada", 1);
            db.coll::<Account>().create_with_ctx(tx.ctx(), &mut acc).await?;

            cancel.cancel();
            tx.commit().await
        })
        .await
        .unwrap_err();

    assert!(matches!(err, OdmError::Cancelled));
    assert_eq!(store.coll::<Account>().count_documents(doc! {}, None).await.unwrap(), 0);
}

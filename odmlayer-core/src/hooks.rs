//! Lifecycle hook dispatch.
//!
//! Each mutating collection operation calls one `before_*` dispatcher ahead of the backend
//! write and, only when the write succeeded, the matching `after_*` dispatcher:
//!
//! | operation | before                                       | after                        |
//! |-----------|----------------------------------------------|------------------------------|
//! | create    | `on_creating`, `before_create`, `before_save` | `after_create`, `after_save` |
//! | update    | `on_saving`, `before_update`, `before_save`   | `after_update`, `after_save` |
//! | delete    | `before_delete`                              | `after_delete`               |
//!
//! The first hook returning an error stops the sequence and its error is returned as is.

use crate::{
    backend::{DeleteResult, UpdateResult},
    context::Ctx,
    error::OdmResult,
    model::Model,
};

pub async fn before_create<M: Model>(ctx: &Ctx, model: &mut M) -> OdmResult<()> {
    model.on_creating();
    model.before_create(ctx).await?;
    model.before_save(ctx).await
}

pub async fn after_create<M: Model>(ctx: &Ctx, model: &mut M) -> OdmResult<()> {
    model.after_create(ctx).await?;
    model.after_save(ctx).await
}

pub async fn before_update<M: Model>(ctx: &Ctx, model: &mut M) -> OdmResult<()> {
    model.on_saving();
    model.before_update(ctx).await?;
    model.before_save(ctx).await
}

pub async fn after_update<M: Model>(ctx: &Ctx, result: &UpdateResult, model: &mut M) -> OdmResult<()> {
    model.after_update(ctx, result).await?;
    model.after_save(ctx).await
}

pub async fn before_delete<M: Model>(ctx: &Ctx, model: &mut M) -> OdmResult<()> {
    model.before_delete(ctx).await
}

pub async fn after_delete<M: Model>(ctx: &Ctx, result: &DeleteResult, model: &mut M) -> OdmResult<()> {
    model.after_delete(ctx, result).await
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bson::Bson;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{error::OdmError, model::ModelHooks};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Recorder {
        calls: Vec<String>,
        fail_on: Option<String>,
    }

    impl Recorder {
        fn record(&mut self, name: &str) -> OdmResult<()> {
            self.calls.push(name.to_string());
            match &self.fail_on {
                Some(fail_on) if fail_on == name => Err(OdmError::hook(name)),
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl ModelHooks for Recorder {
        async fn before_create(&mut self, _ctx: &Ctx) -> OdmResult<()> {
            self.record("before_create")
        }

        async fn after_create(&mut self, _ctx: &Ctx) -> OdmResult<()> {
            self.record("after_create")
        }

        async fn before_update(&mut self, _ctx: &Ctx) -> OdmResult<()> {
            self.record("before_update")
        }

        async fn after_update(&mut self, _ctx: &Ctx, result: &UpdateResult) -> OdmResult<()> {
            self.record(&format!("after_update:{}", result.matched_count))
        }

        async fn before_save(&mut self, _ctx: &Ctx) -> OdmResult<()> {
            self.record("before_save")
        }

        async fn after_save(&mut self, _ctx: &Ctx) -> OdmResult<()> {
            self.record("after_save")
        }

        async fn before_delete(&mut self, _ctx: &Ctx) -> OdmResult<()> {
            self.record("before_delete")
        }

        async fn after_delete(&mut self, _ctx: &Ctx, result: &DeleteResult) -> OdmResult<()> {
            self.record(&format!("after_delete:{}", result.deleted_count))
        }
    }

    impl Model for Recorder {
        fn collection_name() -> &'static str {
            "recorders"
        }

        fn id(&self) -> Bson {
            Bson::Null
        }

        fn set_id(&mut self, _id: Bson) {}

        fn prepare_id(&self, raw: Bson) -> OdmResult<Bson> {
            Ok(raw)
        }

        fn on_creating(&mut self) {
            self.calls.push("on_creating".to_string());
        }

        fn on_saving(&mut self) {
            self.calls.push("on_saving".to_string());
        }
    }

    #[tokio::test]
    async fn create_hooks_run_in_order() {
        let ctx = Ctx::background();
        let mut model = Recorder::default();

        before_create(&ctx, &mut model).await.unwrap();
        after_create(&ctx, &mut model).await.unwrap();

        assert_eq!(
            model.calls,
            vec!["on_creating", "before_create", "before_save", "after_create", "after_save"],
        );
    }

    #[tokio::test]
    async fn update_hooks_receive_result() {
        let ctx = Ctx::background();
        let mut model = Recorder::default();
        let result = UpdateResult {
            matched_count: 1,
            ..Default::default()
        };

        before_update(&ctx, &mut model).await.unwrap();
        after_update(&ctx, &result, &mut model).await.unwrap();

        assert_eq!(
            model.calls,
            vec!["on_saving", "before_update", "before_save", "after_update:1", "after_save"],
        );
    }

    #[tokio::test]
    async fn failing_hook_stops_sequence() {
        let ctx = Ctx::background();
        let mut model = Recorder {
            fail_on: Some("before_create".to_string()),
            ..Default::default()
        };

        let err = before_create(&ctx, &mut model).await.unwrap_err();

        assert!(matches!(err, OdmError::Hook(ref name) if name == "before_create"));
        assert_eq!(model.calls, vec!["on_creating", "before_create"]);
    }

    #[tokio::test]
    async fn delete_hooks_receive_result() {
        let ctx = Ctx::background();
        let mut model = Recorder::default();

        before_delete(&ctx, &mut model).await.unwrap();
        after_delete(&ctx, &DeleteResult { deleted_count: 0 }, &mut model)
            .await
            .unwrap();

        assert_eq!(model.calls, vec!["before_delete", "after_delete:0"]);
    }
}

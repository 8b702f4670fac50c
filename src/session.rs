use crate::{
    error::ClipreelResult,
    model::{ExportShape, Protagonist},
    source::{AssetSource, RetryPolicy, with_retry},
    store::SceneStore,
};

/// Session-scoped context handed explicitly to every component.
///
/// There is no ambient global state: whoever constructs a scheduler,
/// orchestrator, or playback controller passes the context in.
#[derive(Clone, Default)]
pub struct SessionContext {
    pub store: SceneStore,
    pub protagonist: Protagonist,
    pub voice: String,
    pub shape: ExportShape,
    pub retry: RetryPolicy,
}

impl SessionContext {
    pub fn new(store: SceneStore, shape: ExportShape) -> Self {
        Self {
            store,
            protagonist: Protagonist::default(),
            voice: "Anna".to_string(),
            shape,
            retry: RetryPolicy::default(),
        }
    }

    /// Regenerate the protagonist reference image from its description.
    /// Scenes already materialized keep their assets; only future image
    /// generations pick up the new anchor.
    pub async fn regenerate_protagonist(
        &mut self,
        source: &dyn AssetSource,
    ) -> ClipreelResult<()> {
        let description = self.protagonist.description.clone();
        let payload = with_retry(self.retry, || {
            source.generate_image(&description, self.shape, &description, None)
        })
        .await?;
        self.protagonist.reference_image = Some(payload);
        Ok(())
    }
}

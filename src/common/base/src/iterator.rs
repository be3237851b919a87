/// AsyncIterator yields items that need IO to produce, stopping at the first error.
#[async_trait]
pub trait AsyncIterator {
    type Item;
    async fn try_next(&mut self) -> anyhow::Result<Option<Self::Item>>;
}

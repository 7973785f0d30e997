use crate::error::{Error, Result};
use crate::interval::{normalize, IntervalInput};
use crate::session::{Session, StatementBuilder, TableRef};

/// Age and creation-time bounds for `show_chunks`
///
/// Age bounds (`older_than`, `newer_than`) and creation bounds
/// (`created_before`, `created_after`) cannot be mixed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkFilter {
    pub older_than: Option<IntervalInput>,
    pub newer_than: Option<IntervalInput>,
    pub created_before: Option<IntervalInput>,
    pub created_after: Option<IntervalInput>,
}

impl ChunkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn older_than(mut self, age: impl Into<IntervalInput>) -> Self {
        self.older_than = Some(age.into());
        self
    }

    pub fn newer_than(mut self, age: impl Into<IntervalInput>) -> Self {
        self.newer_than = Some(age.into());
        self
    }

    pub fn created_before(mut self, age: impl Into<IntervalInput>) -> Self {
        self.created_before = Some(age.into());
        self
    }

    pub fn created_after(mut self, age: impl Into<IntervalInput>) -> Self {
        self.created_after = Some(age.into());
        self
    }

    fn arguments(&self) -> [(&'static str, Option<&IntervalInput>); 4] {
        [
            ("older_than", self.older_than.as_ref()),
            ("newer_than", self.newer_than.as_ref()),
            ("created_before", self.created_before.as_ref()),
            ("created_after", self.created_after.as_ref()),
        ]
    }
}

/// Names of the chunks of `table` matching `filter`
pub async fn show_chunks<S: Session + ?Sized>(
    session: &mut S,
    table: &str,
    filter: &ChunkFilter,
) -> Result<Vec<String>> {
    let table = TableRef::parse(table)?;

    let by_age = filter.older_than.is_some() || filter.newer_than.is_some();
    let by_creation = filter.created_before.is_some() || filter.created_after.is_some();
    if by_age && by_creation {
        return Err(Error::Configuration(
            "older_than/newer_than cannot be combined with created_before/created_after"
                .to_string(),
        ));
    }

    let mut builder = StatementBuilder::new();
    builder.push("SELECT show_chunks(").push_bind(table.quoted()).push("::regclass");
    for (name, value) in filter.arguments() {
        if let Some(raw) = value {
            let spec = normalize(raw)?;
            let expr = spec.bind_interval(&mut builder);
            builder.push(", ").push(name).push(" => ").push(&expr);
        }
    }
    builder.push(")::text AS chunk");

    let rows = session.fetch_all(&builder.build()).await?;
    let chunks = rows
        .iter()
        .map(|row| row.try_text("chunk"))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    tracing::debug!("{} has {} matching chunks", table, chunks.len());
    Ok(chunks)
}

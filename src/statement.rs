use crate::error::SqlExecutorError;
use crate::types::RowValues;

/// Parameter handle handed to binders before a statement runs.
///
/// Indexes are 1-based, matching `?` placeholder positions. Every position up to the highest
/// one set must be filled before execution.
#[derive(Debug, Clone, Default)]
pub struct Statement {
    params: Vec<Option<RowValues>>,
    invalid_index: bool,
}

impl Statement {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the parameter at `index` (1-based), replacing any previous value.
    ///
    /// Index 0 is recorded as a binding error and reported when the statement runs.
    pub fn set(&mut self, index: usize, value: impl Into<RowValues>) -> &mut Self {
        let Some(slot) = index.checked_sub(1) else {
            self.invalid_index = true;
            return self;
        };
        if self.params.len() <= slot {
            self.params.resize(slot + 1, None);
        }
        self.params[slot] = Some(value.into());
        self
    }

    /// Append a parameter after the highest position set so far.
    pub fn push(&mut self, value: impl Into<RowValues>) -> &mut Self {
        self.params.push(Some(value.into()));
        self
    }

    /// Append every value in order.
    pub fn extend<I, V>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<RowValues>,
    {
        self.params
            .extend(values.into_iter().map(|v| Some(v.into())));
        self
    }

    /// Drop every bound parameter.
    pub fn clear(&mut self) {
        self.params.clear();
        self.invalid_index = false;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Finish binding and hand back the positional parameter list.
    ///
    /// # Errors
    /// Returns `SqlExecutorError::ParameterError` if a position below the highest bound one
    /// was never set, or if index 0 was used.
    pub fn into_params(self) -> Result<Vec<RowValues>, SqlExecutorError> {
        if self.invalid_index {
            return Err(SqlExecutorError::ParameterError(
                "parameter index 0 is invalid".into(),
            ));
        }
        self.params
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                value.ok_or_else(|| {
                    SqlExecutorError::ParameterError(format!("parameter {} was not set", i + 1))
                })
            })
            .collect()
    }
}

/// Something that fills a [`Statement`] with parameters.
///
/// Implemented for closures taking `&mut Statement`, for [`Params`] and for [`NoParams`].
pub trait Binder: Send + 'static {
    fn bind(self, statement: &mut Statement);
}

impl<F> Binder for F
where
    F: FnOnce(&mut Statement) + Send + 'static,
{
    fn bind(self, statement: &mut Statement) {
        self(statement);
    }
}

/// Binder that leaves the statement without parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoParams;

impl Binder for NoParams {
    fn bind(self, _statement: &mut Statement) {}
}

/// Binder over an already-built positional parameter list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(pub Vec<RowValues>);

impl Binder for Params {
    fn bind(self, statement: &mut Statement) {
        statement.extend(self.0);
    }
}

impl From<Vec<RowValues>> for Params {
    fn from(values: Vec<RowValues>) -> Self {
        Params(values)
    }
}

/// Boxed binder as stored by batches.
pub(crate) type BoxedBinder = Box<dyn FnOnce(&mut Statement) + Send>;

pub(crate) fn boxed<B: Binder>(binder: B) -> BoxedBinder {
    Box::new(move |stmt: &mut Statement| binder.bind(stmt))
}

/// Run a binder against a fresh statement and collect its parameters.
pub(crate) fn collect_params<B: Binder>(binder: B) -> Result<Vec<RowValues>, SqlExecutorError> {
    let mut statement = Statement::new();
    binder.bind(&mut statement);
    statement.into_params()
}

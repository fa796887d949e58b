//! Transformer trait for per-row data transformation

use eyre::Result;

/// Deterministic step between extraction and publishing.
///
/// Implementors handle one concern each:
/// - Value normalization (timestamps)
/// - Formatting typed cells as text
/// - Fitting rows to a tab's column range
/// - Enforcing destination cell limits
///
/// # Example
/// ```
/// use tabsync::etl::Transformer;
/// use eyre::Result;
///
/// struct Uppercase;
///
/// impl Transformer for Uppercase {
///     type Input = Vec<String>;
///     type Output = Vec<String>;
///
///     fn transform(&self, input: Self::Input) -> Result<Self::Output> {
///         Ok(input.into_iter().map(|s| s.to_uppercase()).collect())
///     }
/// }
///
/// let rows = Uppercase
///     .transform_many(vec![vec!["a".to_string()], vec!["b".to_string()]])
///     .unwrap();
/// assert_eq!(rows, vec![vec!["A"], vec!["B"]]);
/// ```
pub trait Transformer: Send + Sync {
    /// Input item type
    type Input: Send;

    /// Output item type after transformation
    type Output: Send;

    /// Transform a single item
    ///
    /// # Errors
    /// Returns an error if the item cannot be converted
    fn transform(&self, input: Self::Input) -> Result<Self::Output>;

    /// Transform multiple items, stopping at the first failure
    fn transform_many(&self, inputs: Vec<Self::Input>) -> Result<Vec<Self::Output>> {
        inputs.into_iter().map(|i| self.transform(i)).collect()
    }
}

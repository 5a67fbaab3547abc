//! OData query options

pub mod odata;

/// OData query options for collection and single-record reads.
///
/// # Example
///
/// ```
/// use d365fo_lib::api::query::QueryOptions;
///
/// let options = QueryOptions::new()
///     .select(&["CustomerAccount", "Name"])
///     .filter("CustomerGroupId eq 'DOM'")
///     .top(10);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Fields for `$select`.
    pub select: Option<Vec<String>>,
    /// Raw `$filter` expression, passed through unmodified.
    pub filter: Option<String>,
    /// Navigation properties for `$expand`.
    pub expand: Option<Vec<String>>,
    /// Sort expressions for `$orderby`.
    pub orderby: Option<Vec<String>>,
    /// Maximum records for `$top`.
    pub top: Option<u64>,
    /// Records to skip for `$skip`.
    pub skip: Option<u64>,
    /// Whether to request `$count=true`.
    pub count: bool,
    /// Free-text `$search` expression.
    pub search: Option<String>,
}

impl QueryOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fields to select.
    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select = Some(fields.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Sets the filter expression.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Sets the navigation properties to expand.
    pub fn expand(mut self, props: &[&str]) -> Self {
        self.expand = Some(props.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Sets the sort order.
    pub fn orderby(mut self, fields: &[&str]) -> Self {
        self.orderby = Some(fields.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Sets the maximum number of records.
    pub fn top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    /// Sets the number of records to skip.
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Requests the total count alongside the page.
    pub fn count(mut self) -> Self {
        self.count = true;
        self
    }

    /// Sets the free-text search expression.
    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Returns `true` if no option is set.
    pub fn is_empty(&self) -> bool {
        self.select.is_none()
            && self.filter.is_none()
            && self.expand.is_none()
            && self.orderby.is_none()
            && self.top.is_none()
            && self.skip.is_none()
            && !self.count
            && self.search.is_none()
    }

    /// Reconstructs options from raw query parameters.
    ///
    /// The inverse of [`odata::build_query_params`] for the recognized
    /// parameter subset; unrecognized parameters are ignored.
    pub fn from_params(params: &[(String, String)]) -> Self {
        let mut options = Self::default();
        for (key, value) in params {
            match key.as_str() {
                "$select" => {
                    options.select = Some(value.split(',').map(|s| s.to_string()).collect());
                }
                "$filter" => options.filter = Some(value.clone()),
                "$expand" => {
                    options.expand = Some(value.split(',').map(|s| s.to_string()).collect());
                }
                "$orderby" => {
                    options.orderby = Some(value.split(',').map(|s| s.to_string()).collect());
                }
                "$top" => options.top = value.parse().ok(),
                "$skip" => options.skip = value.parse().ok(),
                "$count" => options.count = value == "true",
                "$search" => options.search = Some(value.clone()),
                _ => {}
            }
        }
        options
    }
}

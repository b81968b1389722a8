use crate::errors::GatewayError;
use crate::props::{Filter, PropertyDescriptor, PropertyTable};
use crate::search::translate_search;
use crate::sort::translate_sort;

/// Normalizes the query arguments of client requests before they reach a
/// device.
///
/// The router only depends on this trait, so a gateway can speak a
/// different client-side query language without touching the request path.
pub trait QueryTranslator: Send + Sync {
    fn filter(&self, filter: &str) -> Filter;

    /// `Err(BadQuery)` when any key cannot be sorted on.
    fn sort(&self, sort_by: &str) -> Result<String, GatewayError>;

    /// `Err(BadQuery)` when the expression is not valid.
    fn search(&self, query: &str) -> Result<String, GatewayError>;

    fn property(&self, name: &str) -> Option<&'static PropertyDescriptor>;
}

/// Bus property names over ContentDirectory search and sort syntax.
#[derive(Clone, Debug, Default)]
pub struct UpnpQueryTranslator {
    props: PropertyTable,
}

impl UpnpQueryTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn properties(&self) -> &PropertyTable {
        &self.props
    }
}

impl QueryTranslator for UpnpQueryTranslator {
    fn filter(&self, filter: &str) -> Filter {
        self.props.parse_filter(filter)
    }

    fn sort(&self, sort_by: &str) -> Result<String, GatewayError> {
        translate_sort(&self.props, sort_by)
    }

    fn search(&self, query: &str) -> Result<String, GatewayError> {
        translate_search(&self.props, query)
    }

    fn property(&self, name: &str) -> Option<&'static PropertyDescriptor> {
        self.props.lookup(name)
    }
}

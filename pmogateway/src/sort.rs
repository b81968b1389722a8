use crate::errors::GatewayError;
use crate::props::PropertyTable;

/// Translates a client sort specification into ContentDirectory
/// `SortCriteria`.
///
/// The input is a comma-separated list of bus property names, each
/// optionally prefixed by `+` (ascending, the default) or `-`. The output
/// always carries the sign: `-Date,DisplayName` becomes
/// `-dc:date,+dc:title`. An empty specification means "no sorting".
pub fn translate_sort(props: &PropertyTable, sort_by: &str) -> Result<String, GatewayError> {
    let sort_by = sort_by.trim();
    if sort_by.is_empty() {
        return Ok(String::new());
    }

    let mut criteria = Vec::new();
    for key in sort_by.split(',') {
        let key = key.trim();
        let (sign, name) = match key.chars().next() {
            Some(sign @ ('+' | '-')) => (sign, key[1..].trim_start()),
            _ => ('+', key),
        };

        if name.is_empty() {
            return Err(GatewayError::BadQuery(format!(
                "Empty sort key in '{}'",
                sort_by
            )));
        }

        let upnp = props
            .lookup(name)
            .filter(|prop| prop.is_queryable())
            .and_then(|prop| prop.upnp)
            .ok_or_else(|| GatewayError::BadQuery(format!("Cannot sort on '{}'", name)))?;

        criteria.push(format!("{}{}", sign, upnp));
    }

    Ok(criteria.join(","))
}

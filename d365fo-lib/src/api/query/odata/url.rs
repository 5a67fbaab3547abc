//! OData URL and query string generation.
//!
//! Builds the `/data` URLs D365 F&O accepts, including the automatic
//! `cross-company=true` flag: per-company entities reject direct reads
//! across legal entities unless the flag is present, so it is injected
//! whenever `dataAreaId` shows up in a composite key or a filter.

use super::encode_key;
use super::encode_preserving_structure;
use crate::api::query::QueryOptions;
use crate::error::ApiError;
use crate::model::EntityKey;
use crate::model::PublicEntityInfo;

/// The namespace prefix for D365 F&O OData actions.
pub const ACTION_NAMESPACE: &str = "Microsoft.Dynamics.DataEntities.";

/// Builds an entity or record URL.
///
/// Without a key this is `base/data/<entity_set>`. A single key renders as
/// `base/data/<entity_set>('<literal>')`; a composite key as
/// `base/data/<entity_set>(k1=<lit1>,k2=<lit2>,…)` ordered by the schema's
/// key fields when a schema is given.
///
/// `cross-company=true` is appended when the key contains `dataAreaId`
/// (case-insensitive) or when `add_cross_company` forces it.
pub fn build_entity_url(
    base_url: &str,
    entity_set: &str,
    key: Option<&EntityKey>,
    schema: Option<&PublicEntityInfo>,
    add_cross_company: bool,
) -> Result<String, ApiError> {
    let base = format!("{}/data/{}", base_url.trim_end_matches('/'), entity_set);

    let Some(key) = key else {
        return Ok(base);
    };

    let literal = encode_key(key, schema)?;
    let mut url = format!("{}({})", base, literal);
    if add_cross_company || key.has_data_area_id() {
        url.push_str("?cross-company=true");
    }
    Ok(url)
}

/// Builds an action invocation URL.
///
/// The action name is qualified with [`ACTION_NAMESPACE`] unless the caller
/// already passed a fully qualified name. Unbound actions target
/// `base/data/<qname>`; entity-set-bound actions
/// `base/data/<entity_set>/<qname>`; instance-bound actions
/// `base/data/<entity_set>(<key>)/<qname>`.
pub fn build_action_url(
    base_url: &str,
    action_name: &str,
    entity_set: Option<&str>,
    entity_key: Option<&EntityKey>,
    schema: Option<&PublicEntityInfo>,
    add_cross_company: bool,
) -> Result<String, ApiError> {
    let base = base_url.trim_end_matches('/');

    let action_path = if action_name.starts_with('/') {
        action_name.to_string()
    } else if action_name.starts_with(ACTION_NAMESPACE) {
        format!("/{}", action_name)
    } else {
        format!("/{}{}", ACTION_NAMESPACE, action_name)
    };

    match (entity_set, entity_key) {
        (Some(entity_set), Some(key)) => {
            let literal = encode_key(key, schema)?;
            let mut url = format!("{}/data/{}({}){}", base, entity_set, literal, action_path);
            if add_cross_company || key.has_data_area_id() {
                url.push_str("?cross-company=true");
            }
            Ok(url)
        }
        (Some(entity_set), None) => Ok(format!("{}/data/{}{}", base, entity_set, action_path)),
        (None, _) => Ok(format!("{}/data{}", base, action_path)),
    }
}

/// Builds ordered query parameters from options.
///
/// `cross-company=true` is injected right after `$filter` when the filter
/// mentions `dataareaid` case-insensitively.
pub fn build_query_params(options: &QueryOptions) -> Vec<(String, String)> {
    let mut params = Vec::new();

    if let Some(select) = &options.select {
        params.push(("$select".to_string(), select.join(",")));
    }

    if let Some(filter) = &options.filter {
        params.push(("$filter".to_string(), filter.clone()));
        if filter.to_lowercase().contains("dataareaid") {
            params.push(("cross-company".to_string(), "true".to_string()));
        }
    }

    if let Some(expand) = &options.expand {
        params.push(("$expand".to_string(), expand.join(",")));
    }

    if let Some(orderby) = &options.orderby {
        params.push(("$orderby".to_string(), orderby.join(",")));
    }

    if let Some(top) = options.top {
        params.push(("$top".to_string(), top.to_string()));
    }

    if let Some(skip) = options.skip {
        params.push(("$skip".to_string(), skip.to_string()));
    }

    if options.count {
        params.push(("$count".to_string(), "true".to_string()));
    }

    if let Some(search) = &options.search {
        params.push(("$search".to_string(), search.clone()));
    }

    params
}

/// Builds a query string (with leading `?` when any parameter exists) from
/// options.
pub fn build_query_string(options: &QueryOptions) -> String {
    let params = build_query_params(options);
    if params.is_empty() {
        return String::new();
    }

    let joined = params
        .iter()
        .map(|(key, value)| format!("{}={}", key, encode_preserving_structure(value)))
        .collect::<Vec<_>>()
        .join("&");
    format!("?{}", joined)
}

/// Merges two query strings, normalizing leading `?` and deduplicating the
/// `cross-company=true` flag when both sides carry it.
pub fn merge_query_strings(base_query: &str, additional_query: &str) -> String {
    let base = base_query.trim_start_matches('?');
    let additional = additional_query.trim_start_matches('?');

    let additional = if base
        .split('&')
        .any(|p| p == "cross-company=true")
    {
        additional
            .split('&')
            .filter(|p| !p.is_empty() && *p != "cross-company=true")
            .collect::<Vec<_>>()
            .join("&")
    } else {
        additional.to_string()
    };

    match (base.is_empty(), additional.is_empty()) {
        (true, true) => String::new(),
        (false, true) => format!("?{}", base),
        (true, false) => format!("?{}", additional),
        (false, false) => format!("?{}&{}", base, additional),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyInfo;

    fn prop(name: &str, data_type: &str, is_key: bool, order: i32) -> PropertyInfo {
        PropertyInfo {
            name: name.to_string(),
            type_name: format!("Edm.{}", data_type),
            data_type: data_type.to_string(),
            label_id: None,
            label_text: None,
            is_key,
            is_mandatory: false,
            configuration_enabled: true,
            allow_edit: true,
            allow_edit_on_create: true,
            is_dimension: false,
            dimension_relation: None,
            property_order: order,
        }
    }

    fn schema(properties: Vec<PropertyInfo>) -> PublicEntityInfo {
        PublicEntityInfo {
            name: "Test".to_string(),
            entity_set_name: "Tests".to_string(),
            label_id: None,
            label_text: None,
            is_read_only: false,
            configuration_enabled: true,
            properties,
            navigation_properties: Vec::new(),
            property_groups: Vec::new(),
            actions: Vec::new(),
        }
    }

    #[test]
    fn test_collection_url() {
        let url = build_entity_url("https://x.example.com/", "CustomersV3", None, None, false)
            .unwrap();
        assert_eq!(url, "https://x.example.com/data/CustomersV3");
    }

    #[test]
    fn test_simple_key_url() {
        let key = EntityKey::single("USMF");
        let url =
            build_entity_url("https://x.example.com", "Companies", Some(&key), None, false)
                .unwrap();
        assert_eq!(url, "https://x.example.com/data/Companies('USMF')");
    }

    #[test]
    fn test_simple_key_quote_doubling() {
        let key = EntityKey::single("O'Brien");
        let url = build_entity_url("https://x.example.com", "Names", Some(&key), None, false)
            .unwrap();
        assert_eq!(url, "https://x.example.com/data/Names('O''Brien')");
    }

    // Composite key with dataAreaId adds cross-company exactly once.
    #[test]
    fn test_composite_key_with_data_area_id() {
        let key = EntityKey::composite([
            ("dataAreaId", "usmf"),
            ("CustomerAccount", "MAFZAAL001"),
        ]);
        let url =
            build_entity_url("https://x.example.com", "CustomersV3", Some(&key), None, false)
                .unwrap();
        assert_eq!(
            url,
            "https://x.example.com/data/CustomersV3(dataAreaId='usmf',CustomerAccount='MAFZAAL001')?cross-company=true"
        );
        assert_eq!(url.matches("cross-company=true").count(), 1);
    }

    #[test]
    fn test_forced_cross_company() {
        let key = EntityKey::composite([("CustomerAccount", "C1")]);
        let url =
            build_entity_url("https://x.example.com", "CustomersV3", Some(&key), None, true)
                .unwrap();
        assert!(url.ends_with("?cross-company=true"));
        assert_eq!(url.matches("cross-company=true").count(), 1);
    }

    #[test]
    fn test_typed_composite_key() {
        let s = schema(vec![
            prop("LineNum", "Int32", true, 1),
            prop("JournalId", "String", true, 2),
        ]);
        let key = EntityKey::composite([("LineNum", "7"), ("JournalId", "JRN-1")]);
        let url = build_entity_url("https://x.example.com", "Lines", Some(&key), Some(&s), false)
            .unwrap();
        assert_eq!(
            url,
            "https://x.example.com/data/Lines(LineNum=7,JournalId='JRN-1')"
        );
    }

    #[test]
    fn test_unbound_action_url() {
        let url = build_action_url(
            "https://x.example.com",
            "GetApplicationVersion",
            None,
            None,
            None,
            false,
        )
        .unwrap();
        assert_eq!(
            url,
            "https://x.example.com/data/Microsoft.Dynamics.DataEntities.GetApplicationVersion"
        );
    }

    #[test]
    fn test_qualified_action_name_respected() {
        let url = build_action_url(
            "https://x.example.com",
            "Microsoft.Dynamics.DataEntities.GetKeys",
            None,
            None,
            None,
            false,
        )
        .unwrap();
        assert_eq!(
            url,
            "https://x.example.com/data/Microsoft.Dynamics.DataEntities.GetKeys"
        );
    }

    #[test]
    fn test_entity_set_bound_action_url() {
        let url = build_action_url(
            "https://x.example.com",
            "ImportFromPackage",
            Some("DataManagementDefinitionGroups"),
            None,
            None,
            false,
        )
        .unwrap();
        assert_eq!(
            url,
            "https://x.example.com/data/DataManagementDefinitionGroups/Microsoft.Dynamics.DataEntities.ImportFromPackage"
        );
    }

    #[test]
    fn test_instance_bound_action_url() {
        let key = EntityKey::single("USMF");
        let url = build_action_url(
            "https://x.example.com",
            "Activate",
            Some("Companies"),
            Some(&key),
            None,
            false,
        )
        .unwrap();
        assert_eq!(
            url,
            "https://x.example.com/data/Companies('USMF')/Microsoft.Dynamics.DataEntities.Activate"
        );
    }

    // Filter mentioning dataAreaId injects cross-company exactly once.
    #[test]
    fn test_filter_triggers_cross_company() {
        let options = QueryOptions::new()
            .filter("dataAreaId eq 'USMF' and CustomerGroupId eq 'DOM'");
        let qs = build_query_string(&options);
        assert!(qs.contains(
            "$filter=dataAreaId%20eq%20'USMF'%20and%20CustomerGroupId%20eq%20'DOM'"
        ));
        assert!(qs.contains("cross-company=true"));
        assert_eq!(qs.matches("cross-company=true").count(), 1);
    }

    #[test]
    fn test_filter_without_data_area_id() {
        let options = QueryOptions::new().filter("Name eq 'X'");
        let qs = build_query_string(&options);
        assert!(!qs.contains("cross-company"));
    }

    #[test]
    fn test_query_string_empty_options() {
        assert_eq!(build_query_string(&QueryOptions::new()), "");
    }

    #[test]
    fn test_query_string_multiple_options() {
        let options = QueryOptions::new()
            .select(&["Name", "Account"])
            .top(5)
            .count();
        let qs = build_query_string(&options);
        assert_eq!(qs, "?$select=Name,Account&$top=5&$count=true");
    }

    #[test]
    fn test_merge_query_strings() {
        assert_eq!(merge_query_strings("", ""), "");
        assert_eq!(merge_query_strings("?a=1", ""), "?a=1");
        assert_eq!(merge_query_strings("", "b=2"), "?b=2");
        assert_eq!(merge_query_strings("?a=1", "?b=2"), "?a=1&b=2");
        assert_eq!(merge_query_strings("a=1", "b=2"), "?a=1&b=2");
    }

    #[test]
    fn test_merge_never_produces_double_question_mark() {
        let merged = merge_query_strings("?a=1", "?b=2");
        assert!(!merged.contains("??"));
        assert_eq!(merged.matches('?').count(), 1);
    }

    // Key rule and filter rule together still yield a single flag.
    #[test]
    fn test_merge_deduplicates_cross_company() {
        let merged = merge_query_strings(
            "?cross-company=true",
            "?$filter=dataAreaId%20eq%20'USMF'&cross-company=true",
        );
        assert_eq!(merged.matches("cross-company=true").count(), 1);
        assert!(merged.contains("$filter="));
    }

    #[test]
    fn test_query_params_round_trip() {
        let params = vec![
            ("$select".to_string(), "Name,Account".to_string()),
            ("$filter".to_string(), "Name eq 'X'".to_string()),
            ("$orderby".to_string(), "Name asc".to_string()),
            ("$top".to_string(), "10".to_string()),
            ("$skip".to_string(), "5".to_string()),
            ("$count".to_string(), "true".to_string()),
            ("$search".to_string(), "blue".to_string()),
        ];
        let options = QueryOptions::from_params(&params);
        assert_eq!(build_query_params(&options), params);
    }
}

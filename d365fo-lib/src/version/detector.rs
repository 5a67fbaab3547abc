//! Environment version detection.
//!
//! Reads the three unbound version actions plus the module-inventory
//! entity. The inventory entity-set name varies by release, so it is taken
//! from the client configuration. Inventory rows arrive either as
//! structured records or as the pipe-delimited form
//! `Name: … | Version: … | Module: … | Publisher: … | DisplayName: …`.

use serde_json::Value;
use tracing::warn;

use crate::D365Client;
use crate::error::Error;
use crate::model::ModuleVersionInfo;
use crate::model::VersionDetectionResult;

/// Parses a pipe-delimited module inventory line.
pub fn parse_module_line(line: &str) -> Option<ModuleVersionInfo> {
    let mut name = None;
    let mut version = None;
    let mut module_id = None;
    let mut publisher = None;
    let mut display_name = None;

    for part in line.split('|') {
        let Some((key, value)) = part.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "Name" => name = Some(value),
            "Version" => version = Some(value),
            "Module" => module_id = Some(value),
            "Publisher" => publisher = Some(value),
            "DisplayName" => display_name = Some(value),
            _ => {}
        }
    }

    let module_id = module_id.or_else(|| name.clone())?;
    Some(ModuleVersionInfo {
        name: name.unwrap_or_else(|| module_id.clone()),
        version: version?,
        publisher: publisher.unwrap_or_default(),
        display_name: display_name.unwrap_or_default(),
        module_id,
    })
}

/// Parses a structured module inventory record.
fn parse_module_record(record: &Value) -> Option<ModuleVersionInfo> {
    let get = |key: &str| {
        record
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    };

    let name = get("Name");
    let module_id = get("Module").or_else(|| get("ModuleId")).or_else(|| name.clone())?;
    Some(ModuleVersionInfo {
        name: name.unwrap_or_else(|| module_id.clone()),
        version: get("Version")?,
        publisher: get("Publisher").unwrap_or_default(),
        display_name: get("DisplayName").unwrap_or_default(),
        module_id,
    })
}

fn action_value_as_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get("value").and_then(|v| v.as_str()).map(String::from),
        _ => None,
    }
}

impl D365Client {
    /// Reads `GetApplicationVersion`.
    pub async fn get_application_version(&self) -> Result<Option<String>, Error> {
        let value = self
            .call_action("GetApplicationVersion", None, None, None)
            .await?;
        Ok(action_value_as_string(value))
    }

    /// Reads `GetPlatformBuildVersion`.
    pub async fn get_platform_build_version(&self) -> Result<Option<String>, Error> {
        let value = self
            .call_action("GetPlatformBuildVersion", None, None, None)
            .await?;
        Ok(action_value_as_string(value))
    }

    /// Reads `GetApplicationBuildVersion`.
    pub async fn get_application_build_version(&self) -> Result<Option<String>, Error> {
        let value = self
            .call_action("GetApplicationBuildVersion", None, None, None)
            .await?;
        Ok(action_value_as_string(value))
    }

    /// Queries the module-inventory entity and normalizes the rows.
    pub async fn get_installed_modules(&self) -> Result<Vec<ModuleVersionInfo>, Error> {
        let entity_set = self.config().module_inventory_entity.clone();
        let collection = self.get_entities(&entity_set, None).await?;

        let mut modules = Vec::with_capacity(collection.value.len());
        for item in &collection.value {
            let parsed = match item {
                Value::String(line) => parse_module_line(line),
                record => parse_module_record(record),
            };
            if let Some(module) = parsed {
                modules.push(module);
            }
        }
        Ok(modules)
    }

    /// Probes the environment's versions and module inventory.
    ///
    /// Version-action failures propagate; inventory retrieval failures
    /// degrade to an empty module list so the caller can fall back to
    /// version-string comparison.
    pub async fn detect_environment_version(&self) -> Result<VersionDetectionResult, Error> {
        let application_version = self.get_application_version().await?;
        let platform_build_version = self.get_platform_build_version().await?;
        let application_build_version = self.get_application_build_version().await?;

        let modules = match self.get_installed_modules().await {
            Ok(modules) => modules,
            Err(err) => {
                warn!(error = %err, "module inventory retrieval failed, degrading to version strings");
                Vec::new()
            }
        };

        Ok(VersionDetectionResult {
            application_version,
            platform_build_version,
            application_build_version,
            modules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pipe_delimited_line() {
        let module = parse_module_line(
            "Name: AccountsPayableMobile | Version: 10.0.1985.137 | Module: AccountsPayableMobile | Publisher: Microsoft Corporation | DisplayName: Accounts payable mobile",
        )
        .unwrap();
        assert_eq!(module.module_id, "AccountsPayableMobile");
        assert_eq!(module.version, "10.0.1985.137");
        assert_eq!(module.publisher, "Microsoft Corporation");
        assert_eq!(module.display_name, "Accounts payable mobile");
    }

    #[test]
    fn test_parse_line_without_version_is_rejected() {
        assert!(parse_module_line("Name: X | Publisher: Y").is_none());
    }

    #[test]
    fn test_parse_structured_record() {
        let record = serde_json::json!({
            "Name": "GeneralLedger",
            "Version": "10.0.1985.137",
            "Module": "GeneralLedger",
            "Publisher": "Microsoft Corporation",
            "DisplayName": "General ledger"
        });
        let module = parse_module_record(&record).unwrap();
        assert_eq!(module.module_id, "GeneralLedger");
        assert_eq!(module.version, "10.0.1985.137");
    }

    #[test]
    fn test_action_value_shapes() {
        assert_eq!(
            action_value_as_string(serde_json::json!("10.0.38")),
            Some("10.0.38".to_string())
        );
        assert_eq!(
            action_value_as_string(serde_json::json!({"value": "10.0.38"})),
            Some("10.0.38".to_string())
        );
        assert_eq!(action_value_as_string(serde_json::json!(42)), None);
    }
}

//! Field schemas for the automation resource types.

use halyard_core::{FieldSchema, ResourceSchema, SchemaRegistry};

use crate::runbook::RunbookType;

pub const RESOURCE_GROUP: &str = "azurerm_resource_group";
pub const AUTOMATION_ACCOUNT: &str = "azurerm_automation_account";
pub const AUTOMATION_RUNBOOK: &str = "azurerm_automation_runbook";

/// All automation resource types.
pub fn registry() -> SchemaRegistry {
    SchemaRegistry::new()
        .with(resource_group())
        .with(automation_account())
        .with(automation_runbook())
}

pub fn resource_group() -> ResourceSchema {
    ResourceSchema::new(
        RESOURCE_GROUP,
        vec![
            FieldSchema::string("name")
                .required()
                .validate_with(resource_group_name),
            FieldSchema::string("location").required(),
            FieldSchema::string("id").output_only(),
        ],
    )
}

pub fn automation_account() -> ResourceSchema {
    ResourceSchema::new(
        AUTOMATION_ACCOUNT,
        vec![
            FieldSchema::string("name").required().validate_with(account_name),
            FieldSchema::string("location").required(),
            FieldSchema::string("resource_group_name").required(),
            FieldSchema::block(
                "sku",
                vec![FieldSchema::string("name").required().one_of(&["Free", "Basic"])],
            )
            .required()
            .max_items(1),
            FieldSchema::string("id").output_only(),
        ],
    )
    .scoped_by(&["resource_group_name"])
}

pub fn automation_runbook() -> ResourceSchema {
    ResourceSchema::new(
        AUTOMATION_RUNBOOK,
        vec![
            FieldSchema::string("name").required().validate_with(runbook_name),
            FieldSchema::string("location").required(),
            FieldSchema::string("resource_group_name").required(),
            FieldSchema::string("account_name").required(),
            FieldSchema::bool("log_verbose").required(),
            FieldSchema::bool("log_progress").required(),
            FieldSchema::string("description"),
            FieldSchema::string("runbook_type")
                .required()
                .one_of(&RunbookType::NAMES),
            FieldSchema::block(
                "publish_content_link",
                vec![
                    FieldSchema::string("uri").required().validate_with(content_uri),
                    FieldSchema::string("version"),
                    FieldSchema::block(
                        "hash",
                        vec![
                            FieldSchema::string("algorithm").required().one_of(&["SHA256"]),
                            FieldSchema::string("value").required().validate_with(sha256_hex),
                        ],
                    )
                    .max_items(1),
                ],
            )
            .required()
            .max_items(1),
            FieldSchema::string("id").output_only(),
            FieldSchema::string("state").output_only(),
            FieldSchema::string("creation_time").output_only(),
            FieldSchema::string("last_modified_time").output_only(),
            FieldSchema::string("etag").output_only(),
        ],
    )
    .scoped_by(&["resource_group_name", "account_name"])
}

fn resource_group_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > 90 {
        return Err("must be between 1 and 90 characters".into());
    }
    if name.ends_with('.') {
        return Err("must not end with a period".into());
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '(' | ')'))
    {
        return Err("may only contain alphanumerics, '-', '_', '.', '(' and ')'".into());
    }
    Ok(())
}

fn account_name(name: &str) -> Result<(), String> {
    if !(6..=50).contains(&name.len()) {
        return Err("must be between 6 and 50 characters".into());
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err("must start with a letter".into());
    }
    if name.ends_with('-') {
        return Err("must not end with a hyphen".into());
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err("may only contain letters, digits and hyphens".into());
    }
    Ok(())
}

fn runbook_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > 63 {
        return Err("must be between 1 and 63 characters".into());
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err("must start with a letter".into());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err("may only contain letters, digits, '-' and '_'".into());
    }
    Ok(())
}

fn content_uri(uri: &str) -> Result<(), String> {
    match uri.split_once("://") {
        Some(("https" | "http", rest)) if !rest.is_empty() => Ok(()),
        _ => Err(format!("`{uri}` is not an http(s) URI")),
    }
}

fn sha256_hex(value: &str) -> Result<(), String> {
    if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("must be 64 hexadecimal characters".into());
    }
    Ok(())
}

//! 配置校验模块
//!
//! 校验规则：
//! - 至少一个 endpoint，名称非空
//! - resource / handler 非空
//! - amqp 模式下 url 非空
//! - error_buffer >= 1, prefetch >= 1
//!
//! workers < 1 不是错误：dispatcher 会替换为默认值，这里只产生警告。

use std::collections::BTreeMap;

use ::validator::{Validate, ValidationErrors, ValidationErrorsKind};
use contracts::{BrokerKind, ContractError, ServiceBlueprint};

/// 校验 ServiceBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &ServiceBlueprint) -> Result<(), ContractError> {
    validate_sections(blueprint)?;
    validate_broker_url(blueprint)?;
    validate_endpoints(blueprint)?;
    Ok(())
}

/// 非致命问题
///
/// 按 endpoint 名称排序，保证输出稳定。
pub fn warnings(blueprint: &ServiceBlueprint) -> Vec<String> {
    let sorted: BTreeMap<_, _> = blueprint.endpoints.iter().collect();
    sorted
        .into_iter()
        .filter(|(_, spec)| spec.workers < 1)
        .map(|(name, spec)| {
            format!(
                "endpoints.{name}.workers = {} is below 1, the dispatcher default will be used",
                spec.workers
            )
        })
        .collect()
}

/// 派生规则 (service / broker / dispatcher)
fn validate_sections(blueprint: &ServiceBlueprint) -> Result<(), ContractError> {
    blueprint
        .validate()
        .map_err(|errors| to_contract_error("", &errors))
}

/// amqp 模式需要 url
fn validate_broker_url(blueprint: &ServiceBlueprint) -> Result<(), ContractError> {
    if blueprint.broker.kind == BrokerKind::Amqp && blueprint.broker.url.trim().is_empty() {
        return Err(ContractError::config_validation(
            "broker.url",
            "broker url cannot be empty for kind = amqp",
        ));
    }
    Ok(())
}

/// 校验 endpoint 表
fn validate_endpoints(blueprint: &ServiceBlueprint) -> Result<(), ContractError> {
    if blueprint.endpoints.is_empty() {
        return Err(ContractError::config_validation(
            "endpoints",
            "at least one endpoint must be configured",
        ));
    }

    let sorted: BTreeMap<_, _> = blueprint.endpoints.iter().collect();
    for (name, spec) in sorted {
        if name.trim().is_empty() {
            return Err(ContractError::config_validation(
                "endpoints",
                "endpoint name cannot be empty",
            ));
        }
        spec.validate()
            .map_err(|errors| to_contract_error(&format!("endpoints.{name}"), &errors))?;
    }
    Ok(())
}

/// 取第一条违规转换为 ContractError
fn to_contract_error(prefix: &str, errors: &ValidationErrors) -> ContractError {
    match first_violation(prefix, errors) {
        Some((field, message)) => ContractError::config_validation(field, message),
        None => ContractError::config_validation(prefix, errors.to_string()),
    }
}

fn first_violation(prefix: &str, errors: &ValidationErrors) -> Option<(String, String)> {
    let sorted: BTreeMap<_, _> = errors.errors().iter().collect();
    for (field, kind) in sorted {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                if let Some(err) = list.first() {
                    let message = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| err.code.to_string());
                    return Some((path, message));
                }
            }
            ValidationErrorsKind::Struct(inner) => {
                if let Some(found) = first_violation(&path, inner) {
                    return Some(found);
                }
            }
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    if let Some(found) = first_violation(&format!("{path}[{idx}]"), inner) {
                        return Some(found);
                    }
                }
            }
        }
    }
    None
}

//! The parameter/argument registry.
//!
//! Two tables: declared parameters keyed by name, and pending arguments —
//! values supplied before the matching parameter was declared. Declaring a
//! parameter drains a matching pending entry (by name or flag) through the
//! parameter's converter and type check.

use std::collections::HashMap;

use crate::cfg::param::{Param, ParamValue};
use crate::errors::ParamError;

/// Registry of declared parameters and pending arguments.
#[derive(Default, Clone)]
pub struct ParamHolder {
    params: HashMap<String, Param>,
    pending: HashMap<String, ParamValue>,
}

impl ParamHolder {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a parameter.
    ///
    /// Redeclaring a name with the same identity replaces the entry;
    /// redeclaring with a different identity is a collision. A matching
    /// pending argument is drained into the new parameter.
    pub fn declare(&mut self, mut param: Param) -> Result<(), ParamError> {
        if let Some(existing) = self.params.get(param.name()) {
            if existing.identifier() != param.identifier() {
                return Err(ParamError::Collision(param.name().to_string()));
            }
        }
        param.check_shortcode()?;

        if let Some(pending) = self.take_pending(&param) {
            param.set_value(pending)?;
        }
        self.params.insert(param.name().to_string(), param);
        Ok(())
    }

    /// Declares every parameter in order, stopping at the first failure.
    pub fn declare_all(&mut self, params: impl IntoIterator<Item = Param>) -> Result<(), ParamError> {
        for param in params {
            self.declare(param)?;
        }
        Ok(())
    }

    fn take_pending(&mut self, param: &Param) -> Option<ParamValue> {
        if let Some(value) = self.pending.remove(param.name()) {
            return Some(value);
        }
        self.pending.remove(param.flag())
    }

    /// Whether a parameter with this name is declared.
    #[must_use]
    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Whether the named parameter was explicitly bound (defaults do not
    /// count).
    #[must_use]
    pub fn was_set(&self, name: &str) -> bool {
        self.params.get(name).is_some_and(Param::has_been_set)
    }

    /// Looks up a declared parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.get(name)
    }

    /// All declared parameters, values included.
    #[must_use]
    pub fn params(&self) -> Vec<Param> {
        self.params.values().cloned().collect()
    }

    /// The bound value for a name: a declared parameter's value (default
    /// included) or a pending argument.
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<ParamValue> {
        if let Some(param) = self.params.get(name) {
            return param.value().cloned();
        }
        self.pending.get(name).cloned()
    }

    /// All bound values keyed by parameter name, defaults included.
    #[must_use]
    pub fn args(&self) -> HashMap<String, ParamValue> {
        self.params
            .iter()
            .filter_map(|(name, param)| param.value().map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// Like [`args`](Self::args), with pending arguments included.
    #[must_use]
    pub fn all_args(&self) -> HashMap<String, ParamValue> {
        let mut args = self.args();
        for (name, value) in &self.pending {
            args.entry(name.clone()).or_insert_with(|| value.clone());
        }
        args
    }

    /// Binds a value under a name or flag. Values for undeclared names are
    /// stored pending and auto-bound when the parameter appears.
    pub fn set_arg(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
        if let Some(param_name) = self.find_by_name_or_flag(name) {
            if let Some(param) = self.params.get_mut(&param_name) {
                return param.set_value(value);
            }
        }
        self.pending.insert(name.to_string(), value);
        Ok(())
    }

    fn find_by_name_or_flag(&self, key: &str) -> Option<String> {
        if self.params.contains_key(key) {
            return Some(key.to_string());
        }
        self.params
            .values()
            .find(|p| p.flag() == key)
            .map(|p| p.name().to_string())
    }

    /// Parses CLI-style tokens: `-flag`/`--flag` tokens open a flag;
    /// following non-flag tokens accumulate under it and are joined with
    /// commas before conversion. A value before any flag is an error.
    pub fn set_args_from_list(&mut self, tokens: &[String]) -> Result<(), ParamError> {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for token in tokens {
            if let Some(stripped) = token.strip_prefix('-') {
                let flag = stripped.trim_start_matches('-').to_string();
                groups.push((flag, Vec::new()));
            } else if let Some((_, values)) = groups.last_mut() {
                values.push(token.clone());
            } else {
                return Err(ParamError::DanglingValue(token.clone()));
            }
        }
        for (flag, values) in groups {
            self.set_arg(&flag, ParamValue::Str(values.join(",")))?;
        }
        Ok(())
    }

    /// Binds declared parameters from environment variables named
    /// `{PREFIX}_{NAME}` (name uppercased, non-alphanumerics as `_`).
    pub fn bind_env(&mut self, prefix: &str) -> Result<(), ParamError> {
        let names: Vec<String> = self.params.keys().cloned().collect();
        for name in names {
            let var = format!("{prefix}_{}", env_fragment(&name));
            if let Ok(value) = std::env::var(&var) {
                self.set_arg(&name, ParamValue::Str(value))?;
            }
        }
        Ok(())
    }

    /// Validates every declared parameter: type match, regex, and
    /// required-without-default-or-value.
    pub fn validate(&self) -> Result<(), ParamError> {
        for param in self.params.values() {
            if let Some(value) = param.value() {
                if !param.kind().matches(value) {
                    return Err(ParamError::TypeMismatch {
                        name: param.name().to_string(),
                        expected: param.kind().to_string(),
                        actual: value.kind_name(),
                    });
                }
            }
            param.check_regex()?;
            if param.is_required() && !param.has_been_set() && !param.has_default() {
                return Err(ParamError::Required(param.name().to_string()));
            }
        }
        Ok(())
    }
}

fn env_fragment(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

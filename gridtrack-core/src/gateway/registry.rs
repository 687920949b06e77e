//! One-shot gauge registry rendered in the Prometheus text exposition format.

use crate::error::GatewayError;
use std::fmt::Write;

/// A gauge metric family with its labelled samples.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeFamily {
    pub name: String,
    pub help: String,
    pub label_names: Vec<String>,
    samples: Vec<(Vec<String>, f64)>,
}

impl GaugeFamily {
    /// Set the value for one label combination, replacing any previous value.
    pub fn set(&mut self, label_values: &[&str], value: f64) -> Result<(), GatewayError> {
        if label_values.len() != self.label_names.len() {
            return Err(GatewayError::LabelMismatch {
                metric: self.name.clone(),
                expected: self.label_names.len(),
                got: label_values.len(),
            });
        }
        let values: Vec<String> = label_values.iter().map(|v| (*v).to_string()).collect();
        match self.samples.iter_mut().find(|(l, _)| *l == values) {
            Some(sample) => sample.1 = value,
            None => self.samples.push((values, value)),
        }
        Ok(())
    }

    pub fn samples(&self) -> &[(Vec<String>, f64)] {
        &self.samples
    }
}

/// Collection of gauges pushed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GaugeRegistry {
    families: Vec<GaugeFamily>,
}

impl GaugeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gauge family, or return the existing one with that name.
    pub fn gauge(
        &mut self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<&mut GaugeFamily, GatewayError> {
        if !is_valid_metric_name(name) {
            return Err(GatewayError::InvalidMetricName {
                name: name.to_string(),
            });
        }
        if let Some(label) = label_names.iter().find(|l| !is_valid_label_name(l)) {
            return Err(GatewayError::InvalidMetricName {
                name: format!("{name}{{{label}}}"),
            });
        }
        let idx = match self.families.iter().position(|f| f.name == name) {
            Some(idx) => idx,
            None => {
                self.families.push(GaugeFamily {
                    name: name.to_string(),
                    help: help.to_string(),
                    label_names: label_names.iter().map(|l| (*l).to_string()).collect(),
                    samples: Vec::new(),
                });
                self.families.len() - 1
            }
        };
        Ok(&mut self.families[idx])
    }

    pub fn families(&self) -> &[GaugeFamily] {
        &self.families
    }

    pub fn sample_count(&self) -> usize {
        self.families.iter().map(|f| f.samples.len()).sum()
    }

    /// Render in text exposition format 0.0.4.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for family in &self.families {
            if family.samples.is_empty() {
                continue;
            }
            let _ = writeln!(out, "# HELP {} {}", family.name, escape_help(&family.help));
            let _ = writeln!(out, "# TYPE {} gauge", family.name);
            for (values, value) in &family.samples {
                out.push_str(&family.name);
                if !values.is_empty() {
                    let labels: Vec<String> = family
                        .label_names
                        .iter()
                        .zip(values)
                        .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
                        .collect();
                    let _ = write!(out, "{{{}}}", labels.join(","));
                }
                let _ = writeln!(out, " {}", format_value(*value));
            }
        }
        out
    }
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn escape_help(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{v}")
    }
}

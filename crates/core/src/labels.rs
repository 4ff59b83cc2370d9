//! Label conventions and the annotation merge rule.

use crate::error::{KeelError, Result};
use crate::object::{Annotations, Labels};

pub const LABEL_APPLICATION: &str = "keel.io/application";
pub const LABEL_MODEL: &str = "keel.io/model";

/// Labels stamped on definitions owned by `app` in model namespace `model`.
pub fn definition_labels(app: &str, model: &str) -> Labels {
    Labels::from([
        (LABEL_APPLICATION.to_string(), app.to_string()),
        (LABEL_MODEL.to_string(), model.to_string()),
    ])
}

/// Labels stamped on custom resources owned by `app`.
pub fn resource_labels(app: &str) -> Labels {
    Labels::from([(LABEL_APPLICATION.to_string(), app.to_string())])
}

/// Equality-based selector string, e.g. `a=b,c=d`.
pub fn to_selector(labels: &Labels) -> String {
    labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
}

/// Parse an equality-based selector. Empty input selects everything.
pub fn parse_selector(selector: &str) -> Result<Labels> {
    let mut out = Labels::new();
    for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (k, v) = term
            .split_once("==")
            .or_else(|| term.split_once('='))
            .ok_or_else(|| KeelError::NotValid(format!("label selector term {term:?} is not key=value")))?;
        out.insert(k.trim().to_string(), v.trim().to_string());
    }
    Ok(out)
}

/// True if every selector pair is present in `labels`.
pub fn selector_matches(selector: &Labels, labels: &Labels) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// Shallow union; keys in `overrides` win.
pub fn merge_annotations(base: &Annotations, overrides: &Annotations) -> Annotations {
    let mut out = base.clone();
    out.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}

// References:
// 1. https://dashif.org/docs/DASH-IF-IOP-v4.3.pdf
// 2. ISO/IEC 23009-1, 5.3.9.4.4 Template-based Segment URL construction

use regex::{Captures, Regex, Replacer};
use std::{collections::HashMap, sync::LazyLock};

// Only `%0[width]d` is permitted as a format tag, so no printf implementation is needed.
//
// Example template: "$RepresentationID$/$Number%06d$.m4s"
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(RepresentationID|Number|Time|Bandwidth)(?:%0(\d+)d)?\$")
        .expect("template regex is valid")
});

/// Identifier substitution for `SegmentTemplate@media` and
/// `SegmentTemplate@initialization`.
#[derive(Debug, Clone, Default)]
pub struct Template {
    args: HashMap<&'static str, String>,
}

impl Template {
    pub const REPRESENTATION_ID: &'static str = "RepresentationID";
    pub const NUMBER: &'static str = "Number";
    pub const TIME: &'static str = "Time";
    pub const BANDWIDTH: &'static str = "Bandwidth";

    pub fn new() -> Self {
        Self::default()
    }

    /// A template with the identifiers shared by every segment of a representation.
    pub fn for_representation(id: &str, bandwidth: Option<u64>) -> Self {
        let mut template = Self::new();
        template.insert(Self::REPRESENTATION_ID, id.to_string());
        if let Some(bandwidth) = bandwidth {
            template.insert(Self::BANDWIDTH, bandwidth.to_string());
        }
        template
    }

    pub fn insert(&mut self, key: &'static str, value: String) {
        self.args.insert(key, value);
    }

    pub fn with_number(mut self, number: u64) -> Self {
        self.insert(Self::NUMBER, number.to_string());
        self
    }

    pub fn with_time(mut self, time: u64) -> Self {
        self.insert(Self::TIME, time.to_string());
        self
    }

    pub fn resolve(&self, template: &str) -> String {
        TEMPLATE_REGEX
            .replace_all(template, TemplateReplacer(&self.args))
            .into_owned()
    }
}

struct TemplateReplacer<'a>(&'a HashMap<&'static str, String>);

impl Replacer for TemplateReplacer<'_> {
    fn replace_append(&mut self, caps: &Captures<'_>, dst: &mut String) {
        let Some(value) = self.0.get(&caps[1]) else {
            // unknown identifiers are kept as-is
            dst.push_str(&caps[0]);
            return;
        };

        match caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok()) {
            Some(width) => dst.push_str(&format!("{value:0>width$}")),
            None => dst.push_str(value),
        }
    }
}

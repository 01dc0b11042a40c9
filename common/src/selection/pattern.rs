// Wildcard pattern compilation
// A pattern becomes a list of segments plus the directory traversal starts from

use crate::errors::ValidationError;
use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// One `/`-separated piece of a pattern
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    /// `*`, `?` and `[...]` within a single directory level
    Wildcard(Pattern),
    /// `**`: zero or more directory levels
    Recursive,
}

impl Segment {
    fn parse(raw: &str, source: &str) -> Result<Self, ValidationError> {
        if raw == "**" {
            return Ok(Segment::Recursive);
        }
        if !has_wildcard(raw) {
            return Ok(Segment::Literal(raw.to_string()));
        }
        // `**` glued to other characters cannot cross levels
        let mut single_level = raw.to_string();
        while single_level.contains("**") {
            single_level = single_level.replace("**", "*");
        }
        Pattern::new(&single_level)
            .map(Segment::Wildcard)
            .map_err(|e| ValidationError::InvalidPattern {
                pattern: source.to_string(),
                reason: e.to_string(),
            })
    }

    /// Whether an entry name satisfies this segment
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Segment::Literal(literal) => literal == name,
            Segment::Wildcard(pattern) => pattern.matches_with(name, MATCH_OPTIONS),
            Segment::Recursive => true,
        }
    }
}

/// Whether a string contains glob metacharacters
pub fn has_wildcard(value: &str) -> bool {
    value.contains(['*', '?', '['])
}

/// CompiledPattern is a validated wildcard ready for traversal
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPattern {
    source: String,
    segments: Vec<Segment>,
    root: String,
    start_index: usize,
}

impl CompiledPattern {
    pub fn compile(pattern: &str) -> Result<Self, ValidationError> {
        let mut segments: Vec<Segment> = Vec::new();
        for raw in pattern.split(['/', '\\']) {
            if raw.is_empty() || raw == "." {
                continue;
            }
            let segment = Segment::parse(raw, pattern)?;
            if segment == Segment::Recursive && segments.last() == Some(&Segment::Recursive) {
                continue;
            }
            segments.push(segment);
        }

        if segments.is_empty() {
            return Err(ValidationError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "pattern does not name any file".to_string(),
            });
        }

        let literal_prefix = segments
            .iter()
            .take_while(|s| matches!(s, Segment::Literal(_)))
            .count();
        // A fully literal pattern is resolved from its parent directory
        let start_index = literal_prefix.min(segments.len() - 1);

        let root_parts: Vec<&str> = segments[..start_index]
            .iter()
            .filter_map(|s| match s {
                Segment::Literal(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        let root = format!("/{}", root_parts.join("/"));

        Ok(Self {
            source: pattern.to_string(),
            segments,
            root,
            start_index,
        })
    }

    /// `/**`: every file on the server
    pub fn everything() -> Self {
        Self {
            source: "/**".to_string(),
            segments: vec![Segment::Recursive],
            root: "/".to_string(),
            start_index: 0,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Directory the traversal starts from
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Index of the first segment applied below the root
    pub fn start_index(&self) -> usize {
        self.start_index
    }

    pub fn is_recursive(&self) -> bool {
        self.segments.contains(&Segment::Recursive)
    }
}

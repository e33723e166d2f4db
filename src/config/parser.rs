use std::str::FromStr;

use glam::Vec3;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigToken {
    String(String),
    /// A finite number, with the text it was parsed from.
    Number { value: f32, raw: String },
}

impl ConfigToken {
    fn parse(s: String) -> Self {
        match s.parse::<f32>() {
            Ok(value) if value.is_finite() => Self::Number { value, raw: s },
            _ => Self::String(s),
        }
    }
}

impl std::fmt::Display for ConfigToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigToken::String(s) | ConfigToken::Number { raw: s, .. } => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("line {line}: {key} needs parameter {index}")]
    MissingParam {
        line: usize,
        key: String,
        index: usize,
    },

    #[error("line {line}: {key} parameter {index} should be a number, found \"{found}\"")]
    NotANumber {
        line: usize,
        key: String,
        index: usize,
        found: String,
    },

    #[error("line {line}: {key} parameter {index} has an invalid value \"{found}\"")]
    InvalidValue {
        line: usize,
        key: String,
        index: usize,
        found: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigLine {
    /// 1-based line number in the source text.
    pub line: usize,
    pub key: String,
    pub params: Vec<ConfigToken>,
}

impl ConfigLine {
    fn token(&self, index: usize) -> Result<&ConfigToken, ConfigError> {
        self.params.get(index).ok_or_else(|| ConfigError::MissingParam {
            line: self.line,
            key: self.key.clone(),
            index,
        })
    }

    /// Any parameter exactly as written, numbers included.
    pub fn string(&self, index: usize) -> Result<String, ConfigError> {
        self.token(index).map(ToString::to_string)
    }

    pub fn number(&self, index: usize) -> Result<f32, ConfigError> {
        match self.token(index)? {
            ConfigToken::Number { value, .. } => Ok(*value),
            ConfigToken::String(s) => Err(ConfigError::NotANumber {
                line: self.line,
                key: self.key.clone(),
                index,
                found: s.clone(),
            }),
        }
    }

    /// Three numbers starting at `index`.
    pub fn vec3(&self, index: usize) -> Result<Vec3, ConfigError> {
        Ok(Vec3::new(
            self.number(index)?,
            self.number(index + 1)?,
            self.number(index + 2)?,
        ))
    }

    /// Parse a parameter with [FromStr], e.g. a `strum::EnumString`.
    pub fn parse<T: FromStr>(&self, index: usize) -> Result<T, ConfigError> {
        let s = self.string(index)?;
        s.parse().map_err(|_| ConfigError::InvalidValue {
            line: self.line,
            key: self.key.clone(),
            index,
            found: s,
        })
    }

    pub fn maybe_parse<T: FromStr>(&self, index: usize) -> Result<Option<T>, ConfigError> {
        if index < self.params.len() {
            self.parse(index).map(Some)
        } else {
            Ok(None)
        }
    }
}

fn parse_string(chars: &mut std::iter::Peekable<std::str::Chars>) -> Option<String> {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next(); // Skip leading whitespace
    }

    let mut result = String::new();

    match chars.peek()? {
        '"' => {
            chars.next(); // Skip opening quote
            for ch in chars.by_ref() {
                if ch == '"' {
                    break;
                }
                result.push(ch);
            }
        }
        _ => {
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                result.push(ch);
                chars.next();
            }
        }
    }

    Some(result)
}

/// Parse a single `KEY param param ...` line. Empty lines and `;` comments yield `None`.
pub fn parse_line(line_number: usize, line: &str) -> Option<ConfigLine> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(';') {
        return None;
    }

    let mut chars = line.chars().peekable();

    let key = parse_string(&mut chars)?;

    let mut params = Vec::new();
    while let Some(param) = parse_string(&mut chars) {
        params.push(ConfigToken::parse(param));
    }

    Some(ConfigLine {
        line: line_number,
        key,
        params,
    })
}

pub struct ConfigLines {
    lines: Vec<ConfigLine>,
}

impl ConfigLines {
    pub fn parse(s: &str) -> Self {
        Self {
            lines: s
                .lines()
                .enumerate()
                .filter_map(|(i, line)| parse_line(i + 1, line))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigLine> {
        self.lines.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let lines = ConfigLines::parse("; a comment\n\n   \nKEY 1\n");
        let lines = lines.iter().collect::<Vec<_>>();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line, 4);
        assert_eq!(lines[0].key, "KEY");
    }

    #[test]
    fn quoted_strings_keep_spaces() {
        let line = parse_line(1, r#"GEOMETRY "my parts/base.stl" 2"#).unwrap();
        assert_eq!(line.string(0).unwrap(), "my parts/base.stl");
        assert_eq!(line.number(1).unwrap(), 2.0);
    }

    #[test]
    fn integers_and_floats_are_numbers() {
        let line = parse_line(1, "OFFSET 1 -0.282 0").unwrap();
        assert_eq!(line.vec3(0).unwrap(), Vec3::new(1.0, -0.282, 0.0));
    }

    #[test]
    fn numeric_looking_strings_keep_their_text() {
        let line = parse_line(1, "GEOMETRY 1e3 nan 007").unwrap();
        assert_eq!(line.string(0).unwrap(), "1e3");
        assert_eq!(line.string(1).unwrap(), "nan");
        assert_eq!(line.string(2).unwrap(), "007");
        assert_eq!(line.number(0).unwrap(), 1000.0);
        assert!(matches!(
            line.number(1),
            Err(ConfigError::NotANumber { index: 1, .. })
        ));
    }

    #[test]
    fn missing_and_wrong_params_report_the_line() {
        let line = parse_line(7, "OFFSET 1 two").unwrap();
        assert!(matches!(
            line.vec3(0),
            Err(ConfigError::NotANumber { line: 7, index: 1, .. })
        ));

        let line = parse_line(8, "OFFSET 1 2").unwrap();
        assert!(matches!(
            line.vec3(0),
            Err(ConfigError::MissingParam { line: 8, index: 2, .. })
        ));
    }
}

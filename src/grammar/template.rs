use super::*;

/// One piece of a command template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Field(String),
    /// `[...]`: dropped when any field inside is unset, default or empty.
    Optional(Vec<Piece>),
}

/// A compiled command template such as `syslog host {address}[ {port}]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    pieces: Vec<Piece>,
}

fn parse_pieces(source: &str, optional: bool, chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<Vec<Piece>, EngineError> {
    let mut pieces = Vec::new();
    let mut literal = String::new();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => {
                            return Err(EngineError::InvalidGrammar(format!(
                                "unclosed placeholder in template '{source}'"
                            )));
                        }
                    }
                }
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(EngineError::InvalidGrammar(format!(
                        "empty placeholder in template '{source}'"
                    )));
                }
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                pieces.push(Piece::Field(name));
            }
            '[' => {
                if optional {
                    return Err(EngineError::InvalidGrammar(format!(
                        "nested optional segment in template '{source}'"
                    )));
                }
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                pieces.push(Piece::Optional(parse_pieces(source, true, chars)?));
            }
            ']' if optional => {
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(literal));
                }
                return Ok(pieces);
            }
            '}' | ']' => {
                return Err(EngineError::InvalidGrammar(format!(
                    "unbalanced '{c}' in template '{source}'"
                )));
            }
            other => literal.push(other),
        }
    }

    if optional {
        return Err(EngineError::InvalidGrammar(format!(
            "unclosed optional segment in template '{source}'"
        )));
    }
    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(pieces)
}

fn collect_fields<'a>(pieces: &'a [Piece], out: &mut Vec<&'a str>) {
    for piece in pieces {
        match piece {
            Piece::Literal(_) => {}
            Piece::Field(name) => out.push(name),
            Piece::Optional(inner) => collect_fields(inner, out),
        }
    }
}

/// Renders a value the way the CLI spells it, or `None` when it has no spelling.
pub(crate) fn spell(value: &Value, spec: Option<&FieldSpec>) -> Option<String> {
    match (value, spec.map(|s| &s.kind)) {
        (Value::Null | Value::List(_), _) => None,
        (Value::Bool(flag), Some(FieldKind::Switch { on, off })) => {
            Some(if *flag { on.clone() } else { off.clone() })
        }
        (Value::Bool(flag), _) => Some(if *flag { "on" } else { "off" }.to_string()),
        (Value::Int(number), _) => Some(number.to_string()),
        (Value::Text(text), _) => Some(text.clone()),
    }
}

impl Template {
    pub fn parse(source: &str) -> Result<Template, EngineError> {
        let mut chars = source.chars().peekable();
        let pieces = parse_pieces(source, false, &mut chars)?;
        Ok(Template {
            source: source.to_string(),
            pieces,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every field name the template references.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_fields(&self.pieces, &mut out);
        out
    }

    /// Expands the template.
    ///
    /// A required placeholder without a value is an [`EngineError::InvalidRecord`].
    pub fn render(&self, values: &Record, scope: &Scope) -> Result<String, EngineError> {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Field(name) => {
                    let text = values
                        .get(name)
                        .and_then(|value| spell(value, scope.get(name)))
                        .ok_or_else(|| {
                            EngineError::InvalidRecord(format!(
                                "'{}' needs a value for '{}'",
                                self.source, name
                            ))
                        })?;
                    out.push_str(&text);
                }
                Piece::Optional(inner) => {
                    if let Some(text) = render_optional(inner, values, scope) {
                        out.push_str(&text);
                    }
                }
            }
        }
        Ok(out.trim().to_string())
    }
}

fn render_optional(pieces: &[Piece], values: &Record, scope: &Scope) -> Option<String> {
    let mut out = String::new();
    for piece in pieces {
        match piece {
            Piece::Literal(text) => out.push_str(text),
            Piece::Field(name) => {
                let value = values.get(name)?;
                let spec = scope.get(name);
                if spec.and_then(|s| s.default.as_ref()) == Some(value) {
                    return None;
                }
                let text = spell(value, spec)?;
                if text.is_empty() {
                    return None;
                }
                out.push_str(&text);
            }
            Piece::Optional(_) => return None,
        }
    }
    Some(out)
}

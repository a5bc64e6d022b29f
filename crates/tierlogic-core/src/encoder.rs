//! Fact encoder: applicant facts to solver clauses.
//!
//! Every encoding is self-contained text. Nothing is shared between
//! encodings, so two requests can never see each other's facts.

use sha2::{Digest, Sha256};

use crate::facts::{ApplicantFacts, FactValue, SchemaError};

/// Encoded fact block ready to be appended to a rule program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFacts {
    text: String,
    hash: String,
}

impl EncodedFacts {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// SHA-256 of the encoded text, hex encoded.
    pub fn content_hash(&self) -> &str {
        &self.hash
    }
}

/// Encode facts as one `predicate(subject, value).` clause per field.
pub fn encode(facts: &ApplicantFacts) -> Result<EncodedFacts, SchemaError> {
    let subject = quote_atom(facts.subject());
    let mut text = String::new();

    for (predicate, value) in facts.predicates() {
        let rendered = render_value(value).map_err(|reason| SchemaError::InvalidValue {
            key: predicate.to_string(),
            reason,
        })?;
        text.push_str(&format!("{}({}, {}).\n", quote_atom(predicate), subject, rendered));
    }

    let hash = hex::encode(Sha256::digest(text.as_bytes()));

    Ok(EncodedFacts { text, hash })
}

fn render_value(value: &FactValue) -> Result<String, String> {
    match value {
        FactValue::Integer(i) => Ok(i.to_string()),
        FactValue::Number(n) => format_float(*n),
        FactValue::Boolean(b) => Ok(if *b { "true" } else { "false" }.to_string()),
        FactValue::Symbol(s) => Ok(quote_atom(s)),
    }
}

/// Render a float in shortest round-trip form that still reads as a float.
///
/// Prolog needs a fraction before any exponent, so `1e20` becomes `1.0e20`.
pub fn format_float(n: f64) -> Result<String, String> {
    if !n.is_finite() {
        return Err(format!("{} is not a finite number", n));
    }

    let repr = format!("{:?}", n);
    let (mantissa, exponent) = match repr.split_once('e') {
        Some((m, e)) => (m.to_string(), Some(e.to_string())),
        None => (repr, None),
    };

    let mantissa = if mantissa.contains('.') {
        mantissa
    } else {
        format!("{}.0", mantissa)
    };

    Ok(match exponent {
        Some(e) => format!("{}e{}", mantissa, e),
        None => mantissa,
    })
}

/// True for atoms that need no quoting: a lowercase letter followed by
/// letters, digits or underscores.
pub fn is_plain_atom(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Quote an atom if it is not plain.
pub fn quote_atom(s: &str) -> String {
    if is_plain_atom(s) {
        return s.to_string();
    }

    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        match c {
            '\'' => quoted.push_str("\\'"),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

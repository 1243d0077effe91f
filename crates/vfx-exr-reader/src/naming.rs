//! Splitting file-native channel names into view, layer and channel.
//!
//! A name is cut at its first two dots; anything after the second dot stays
//! in the last token. Leading digits are stripped from every token, empty
//! tokens are dropped and other non-alphanumeric bytes become `_`. Every
//! token but the last is either a known view or part of the layer. The last
//! token is the channel, with the usual spellings of R, G, B and A folded to
//! `red`, `green`, `blue` and `alpha`.

use std::fmt;

/// A channel name broken into its parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedName {
    /// Layer, tokens joined with `_`; empty for the main layer.
    pub layer: String,
    /// Channel token after renaming.
    pub channel: String,
    /// View token, empty when the name carries none.
    pub view: String,
}

fn strip_leading_digits(token: &str) -> &str {
    token.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn sanitize(token: &str) -> String {
    token.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

fn rename(channel: &str) -> &str {
    match channel {
        "R" | "r" | "Red" | "RED" => "red",
        "G" | "g" | "Green" | "GREEN" => "green",
        "B" | "b" | "Blue" | "BLUE" => "blue",
        "A" | "a" | "Alpha" | "ALPHA" => "alpha",
        other => other,
    }
}

impl ParsedName {
    /// Parses `name` against the file's known `views`.
    pub fn parse(name: &str, views: &[String]) -> Self {
        let tokens: Vec<String> = name
            .splitn(3, '.')
            .map(strip_leading_digits)
            .filter(|t| !t.is_empty())
            .map(sanitize)
            .collect();

        let mut parsed = ParsedName::default();
        if let Some((last, rest)) = tokens.split_last() {
            for token in rest {
                if views.iter().any(|v| v == token) {
                    parsed.view = token.clone();
                } else {
                    if !parsed.layer.is_empty() {
                        parsed.layer.push('_');
                    }
                    parsed.layer.push_str(token);
                }
            }
            parsed.channel = last.clone();
        }

        // Ci is the primary layer of prman renders
        if parsed.layer == "Ci" {
            parsed.layer.clear();
        }
        parsed.channel = match parsed.channel.as_str() {
            "" => "unnamed".to_string(),
            other => rename(other).to_string(),
        };
        parsed
    }

    /// Host channel name: `layer.channel`, or just `channel` for the main layer.
    pub fn host_name(&self) -> String {
        if self.layer.is_empty() {
            self.channel.clone()
        } else {
            format!("{}.{}", self.layer, self.channel)
        }
    }

    /// Luminance channel, expanded to grey by the resolver.
    pub fn is_luminance(&self) -> bool {
        self.layer.is_empty() && (self.channel == "Y" || self.channel == "y")
    }
}

impl fmt::Display for ParsedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.view.is_empty() {
            write!(f, "[{}] ", self.view)?;
        }
        f.write_str(&self.host_name())
    }
}

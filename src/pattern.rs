use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
};

use hyper::Method;
use regex::Regex;
use url::form_urlencoded;

use crate::Error;

/// Parameters handed to a handler: path placeholders captured by the route
/// pattern, overwritten by query string pairs of the same name.
pub type Parameters = HashMap<String, String>;

/// A compiled route template such as `/books/{category}/{id}` or
/// `/person?active=true`, optionally restricted to a set of HTTP methods.
///
/// Leading and trailing slashes are insignificant on both sides: the template
/// `/person/{id}/` matches `/person/123`, `/person/123/`, `person/123` and
/// `person/123/`. A placeholder captures the text of one path segment, which
/// may be empty.
///
/// A literal query string in the template is a constraint: every key/value
/// pair it lists must appear in the request's query string. Without one, any
/// query string is accepted and only contributes parameters.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    template: String,
    regex: Regex,
    names: Vec<String>,
    query: Vec<(String, String)>,
    methods: Option<Vec<Method>>,
}

impl RoutePattern {
    /// Compiles a template that matches any HTTP method.
    pub fn new(template: &str) -> Result<Self, Error> {
        Self::compile(template, None)
    }

    /// Compiles a template that only matches the given methods. `methods` is a
    /// comma separated list such as `"POST,PUT"`; comparison is case-sensitive.
    pub fn with_methods(template: &str, methods: &str) -> Result<Self, Error> {
        Self::compile(template, Some(methods))
    }

    fn compile(template: &str, methods: Option<&str>) -> Result<Self, Error> {
        let methods = methods.map(parse_methods).transpose()?;

        let (path, query) = match template.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (template, Vec::new()),
        };

        let path = path.trim_matches('/');
        let mut source = String::from("^/?");
        let mut names: Vec<String> = Vec::new();
        let mut rest = path;
        while let Some(open) = rest.find('{') {
            source.push_str(&escape_literal(template, &rest[..open])?);

            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| invalid(template, "unterminated '{'"))?;
            let name = &after[..close];
            if name.is_empty() {
                return Err(invalid(template, "empty parameter name"));
            }
            if name.contains('{') {
                return Err(invalid(template, "nested '{'"));
            }
            if names.iter().any(|existing| existing == name) {
                return Err(invalid(
                    template,
                    &format!("duplicate parameter name {name:?}"),
                ));
            }

            names.push(name.to_string());
            source.push_str("([^/]*)");
            rest = &after[close + 1..];
        }
        source.push_str(&escape_literal(template, rest)?);
        if !path.is_empty() {
            source.push_str("/?");
        }
        source.push('$');

        let regex = Regex::new(&source).map_err(|err| invalid(template, &err.to_string()))?;

        Ok(Self {
            template: template.to_string(),
            regex,
            names,
            query,
            methods,
        })
    }

    /// Returns the template this pattern was compiled from.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Returns the placeholder names in the order they appear.
    pub fn parameter_names(&self) -> &[String] {
        &self.names
    }

    /// Returns the allowed methods, or `None` if any method matches.
    pub fn methods(&self) -> Option<&[Method]> {
        self.methods.as_deref()
    }

    /// Matches a raw request target (path plus optional query string) and
    /// method. Returns the captured path parameters on success, which may be
    /// empty, or `None` if the request does not match.
    pub fn matches(&self, path_and_query: &str, method: &Method) -> Option<Parameters> {
        if let Some(methods) = &self.methods {
            if !methods.contains(method) {
                return None;
            }
        }

        let (path, query) = split_target(path_and_query);
        let captures = self.regex.captures(path)?;

        if !self.query.is_empty() {
            let pairs = parse_query(query.unwrap_or(""));
            if !self.query.iter().all(|required| pairs.contains(required)) {
                return None;
            }
        }

        Some(
            self.names
                .iter()
                .zip(captures.iter().skip(1))
                .map(|(name, value)| {
                    let value = value.map_or("", |m| m.as_str());
                    (name.clone(), value.to_string())
                })
                .collect(),
        )
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.methods {
            Some(methods) => {
                let methods: Vec<&str> = methods.iter().map(Method::as_str).collect();
                write!(f, "{} {}", methods.join(","), self.template)
            }
            None => write!(f, "* {}", self.template),
        }
    }
}

/// Adds the query string pairs of `path_and_query` to `params`, replacing
/// path parameters with the same name. Repeated keys are joined with commas.
pub(crate) fn merge_query(params: &mut Parameters, path_and_query: &str) {
    let (_, Some(query)) = split_target(path_and_query) else {
        return;
    };

    let mut merged = Parameters::new();
    for (key, value) in parse_query(query) {
        match merged.entry(key) {
            Entry::Occupied(mut entry) => {
                let joined = entry.get_mut();
                joined.push(',');
                joined.push_str(&value);
            }
            Entry::Vacant(entry) => {
                entry.insert(value);
            }
        }
    }
    params.extend(merged);
}

pub(crate) fn split_target(path_and_query: &str) -> (&str, Option<&str>) {
    match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    }
}

pub(crate) fn parse_query(query: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn parse_methods(list: &str) -> Result<Vec<Method>, Error> {
    let methods = list
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            Method::from_bytes(token.as_bytes()).map_err(|_| Error::InvalidMethods(list.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if methods.is_empty() {
        return Err(Error::InvalidMethods(list.to_string()));
    }
    Ok(methods)
}

fn escape_literal(template: &str, literal: &str) -> Result<String, Error> {
    if literal.contains('}') {
        return Err(invalid(template, "unmatched '}'"));
    }
    Ok(regex::escape(literal))
}

fn invalid(template: &str, reason: &str) -> Error {
    Error::InvalidPattern {
        template: template.to_string(),
        reason: reason.to_string(),
    }
}

// Command and reply types
//
// `Command` is the serialized form of one API call: a menu path followed by
// attribute (`=k=v`), query (`?k=v`), and `.proplist` words. `Reply` is the
// collected result: zero or more `!re` records plus the `ret` value carried
// on `!done` (the new item id for `add`).

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::protocol::Sentence;

/// One API call, ready to be framed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    path: String,
    words: Vec<String>,
}

impl Command {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            words: Vec::new(),
        }
    }

    /// `<menu>/print`
    pub fn print(menu: &str) -> Self {
        Self::new(format!("{menu}/print"))
    }

    /// `<menu>/add`
    pub fn add(menu: &str) -> Self {
        Self::new(format!("{menu}/add"))
    }

    /// `<menu>/set =.id=<id>`
    pub fn set(menu: &str, id: &str) -> Self {
        Self::new(format!("{menu}/set")).attr(".id", id)
    }

    /// `<menu>/remove =.id=<id>`
    pub fn remove(menu: &str, id: &str) -> Self {
        Self::new(format!("{menu}/remove")).attr(".id", id)
    }

    /// Append an `=key=value` attribute word.
    pub fn attr(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.words.push(format!("={key}={value}"));
        self
    }

    /// Append an attribute only when a value is present.
    pub fn attr_opt<V: fmt::Display>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.attr(key, v),
            None => self,
        }
    }

    /// Append a `?key=value` equality query word.
    pub fn query(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.words.push(format!("?{key}={value}"));
        self
    }

    /// Restrict the returned properties.
    pub fn proplist(mut self, props: &[&str]) -> Self {
        self.words.push(format!("=.proplist={}", props.join(",")));
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Reads are the only cacheable and retryable commands.
    pub fn is_read(&self) -> bool {
        self.path.ends_with("/print")
    }

    /// Cache key: path plus words, order-sensitive.
    pub fn signature(&self) -> String {
        let mut sig = self.path.clone();
        for word in &self.words {
            sig.push('\u{1f}');
            sig.push_str(word);
        }
        sig
    }

    pub(crate) fn to_sentence(&self) -> Sentence {
        std::iter::once(self.path.as_str())
            .chain(self.words.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

// ── Records ──────────────────────────────────────────────────────────

/// One `!re` row: the item's properties as the router reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Record {
    attributes: BTreeMap<String, String>,
}

impl Record {
    pub fn new(attributes: BTreeMap<String, String>) -> Self {
        Self { attributes }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Non-empty value of `key`.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// The router's internal item id (`.id`, e.g. `*1A`).
    pub fn id(&self) -> Option<&str> {
        self.get(".id")
    }

    /// RouterOS booleans are `true`/`false` (older builds: `yes`/`no`).
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true" | "yes"))
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            attributes: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Everything a command returned up to its `!done`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    records: Vec<Record>,
    ret: Option<String>,
}

impl Reply {
    pub fn new(records: Vec<Record>, ret: Option<String>) -> Self {
        Self { records, ret }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn first(&self) -> Option<&Record> {
        self.records.first()
    }

    /// `=ret=` from `!done` (the id assigned by `add`).
    pub fn ret(&self) -> Option<&str> {
        self.ret.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn builder_emits_words_in_order() {
        let cmd = Command::print("/queue/tree")
            .query("name", "Budi")
            .proplist(&[".id", "name", "parent"]);
        assert_eq!(cmd.path(), "/queue/tree/print");
        assert_eq!(cmd.words(), ["?name=Budi", "=.proplist=.id,name,parent"]);
        assert_eq!(
            cmd.to_sentence().words(),
            ["/queue/tree/print", "?name=Budi", "=.proplist=.id,name,parent"]
        );
    }

    #[test]
    fn only_print_is_a_read() {
        assert!(Command::print("/ip/address").is_read());
        assert!(!Command::add("/ip/address").is_read());
        assert!(!Command::set("/queue/tree", "*1").is_read());
        assert!(!Command::remove("/queue/tree", "*1").is_read());
        assert!(!Command::new("/login").is_read());
    }

    #[test]
    fn signature_is_order_sensitive() {
        let a = Command::print("/queue/tree").query("name", "A").query("parent", "B");
        let b = Command::print("/queue/tree").query("parent", "B").query("name", "A");
        assert_ne!(a.signature(), b.signature());
        assert_eq!(a.signature(), a.clone().signature());
    }

    #[test]
    fn attr_opt_skips_absent_values() {
        let cmd = Command::add("/queue/tree")
            .attr("name", "Budi")
            .attr_opt("limit-at", None::<&str>)
            .attr_opt("priority", Some(8));
        assert_eq!(cmd.words(), ["=name=Budi", "=priority=8"]);
    }

    #[test]
    fn record_flags_accept_both_spellings() {
        let rec: Record = [("disabled", "true"), ("dynamic", "yes"), ("invalid", "false")]
            .into_iter()
            .collect();
        assert!(rec.flag("disabled"));
        assert!(rec.flag("dynamic"));
        assert!(!rec.flag("invalid"));
        assert!(!rec.flag("missing"));
    }
}

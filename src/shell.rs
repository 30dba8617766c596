//! Command-line collaborator: tokenizer and verb registry
//!
//! The shell is deliberately outside the core: it turns one line of text
//! into a verb id plus argument vector and nothing more. Tokens split on
//! spaces; backslash is an escape marker inside a token:
//!
//! | escape | result      |
//! |--------|-------------|
//! | `\s`   | space       |
//! | `\t`   | tab         |
//! | `\\`   | backslash   |
//! | other  | the escaped character, backslash dropped |
//!
//! A trailing backslash truncates its token. Verb identifiers are mapped
//! to numeric ids through their rolling hash; the table persists through
//! the saver so user-defined aliases survive restarts, and an empty table
//! on load marks a first start.

use crate::error::{VfsError, VfsResult};
use crate::store::{codec, is_all_digits, parse_column_u64, Saver};
use log::warn;
use rustc_hash::FxHashMap;

/// Logical table name the registry persists under.
const TABLE_NAME: &str = "CommandInterpreter::map_relation";

/// Split a command line into unescaped tokens.
pub fn tokenize(line: &str) -> Vec<String> {
    line.split(' ')
        .filter(|raw| !raw.is_empty())
        .map(unescape)
        .collect()
}

fn unescape(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => out.push(other),
            None => break,
        }
    }
    out
}

/// A parsed command line: resolved verb id (if any) and its arguments.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// Blank line: nothing to do.
    Empty,
    /// First token did not resolve to a registered identifier.
    Unknown(String),
    /// A registered verb with its argument vector.
    Verb(u64, Vec<String>),
}

/// Identifier → verb-id registry with saver persistence.
#[derive(Default)]
pub struct CommandRegistry {
    // Keyed by the identifier's rolling hash, as persisted.
    verbs: FxHashMap<u64, u64>,
    first_start: bool,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identifier for a verb id.
    pub fn add_identifier(&mut self, identifier: &str, verb_id: u64) -> VfsResult<()> {
        let key = codec::hash_bytes(identifier.as_bytes());
        if self.verbs.contains_key(&key) {
            warn!("identifier {} already registered", identifier);
            return Err(VfsError::AlreadyExists(identifier.to_string()));
        }
        self.verbs.insert(key, verb_id);
        Ok(())
    }

    /// Remove an identifier.
    pub fn remove_identifier(&mut self, identifier: &str) -> VfsResult<()> {
        let key = codec::hash_bytes(identifier.as_bytes());
        if self.verbs.remove(&key).is_none() {
            return Err(VfsError::NotFound(identifier.to_string()));
        }
        Ok(())
    }

    pub fn resolve(&self, identifier: &str) -> Option<u64> {
        self.verbs
            .get(&codec::hash_bytes(identifier.as_bytes()))
            .copied()
    }

    /// Tokenize a line and resolve its first token.
    pub fn parse_line(&self, line: &str) -> Command {
        let mut tokens = tokenize(line);
        if tokens.is_empty() {
            return Command::Empty;
        }
        let head = tokens.remove(0);
        match self.resolve(&head) {
            Some(verb_id) => Command::Verb(verb_id, tokens),
            None => Command::Unknown(head),
        }
    }

    /// Whether the last load found no registered identifiers.
    pub fn is_first_start(&self) -> bool {
        self.first_start
    }

    pub fn clear(&mut self) {
        self.verbs.clear();
    }

    pub fn len(&self) -> usize {
        self.verbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }

    /// Persist the registry through the saver.
    pub fn save(&self, saver: &mut Saver) -> VfsResult<()> {
        let mut keys: Vec<u64> = self.verbs.keys().copied().collect();
        keys.sort_unstable();
        let rows: Vec<Vec<String>> = keys
            .iter()
            .map(|key| vec![key.to_string(), self.verbs[key].to_string()])
            .collect();
        saver.put(TABLE_NAME, &rows)
    }

    /// Load the registry; an absent or empty table marks a first start.
    pub fn load(&mut self, saver: &Saver) -> VfsResult<()> {
        self.verbs.clear();
        let rows = match saver.get(TABLE_NAME, false) {
            Ok(rows) => rows,
            Err(VfsError::NotFound(_)) => {
                self.first_start = true;
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        for row in &rows {
            if row.len() != 2 || !is_all_digits(&row[0]) || !is_all_digits(&row[1]) {
                self.verbs.clear();
                self.first_start = true;
                return Err(VfsError::Corruption(
                    "malformed command table row".to_string(),
                ));
            }
            let key = parse_column_u64(&row[0], "identifier hash")?;
            let verb_id = parse_column_u64(&row[1], "verb id")?;
            self.verbs.insert(key, verb_id);
        }
        self.first_start = self.verbs.is_empty();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SaverOptions;
    use tempfile::TempDir;

    #[test]
    fn tokenizer_splits_and_unescapes() {
        assert_eq!(tokenize("ls"), vec!["ls"]);
        assert_eq!(tokenize("  write   a  b "), vec!["write", "a", "b"]);
        assert_eq!(tokenize(r"write file\sname text"), vec!["write", "file name", "text"]);
        assert_eq!(tokenize(r"a\tb"), vec!["a\tb"]);
        assert_eq!(tokenize(r"a\\b"), vec![r"a\b"]);
        // Unknown escape keeps the character, drops the backslash.
        assert_eq!(tokenize(r"a\xb"), vec!["axb"]);
        // A trailing backslash truncates the token.
        assert_eq!(tokenize(r"abc\"), vec!["abc"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn registry_resolves_and_rejects_duplicates() {
        let mut registry = CommandRegistry::new();
        registry.add_identifier("ls", 1).unwrap();
        registry.add_identifier("dir", 1).unwrap();
        assert!(matches!(
            registry.add_identifier("ls", 9),
            Err(VfsError::AlreadyExists(_))
        ));

        assert_eq!(registry.resolve("ls"), Some(1));
        assert_eq!(registry.resolve("dir"), Some(1));
        assert_eq!(registry.resolve("cat"), None);

        registry.remove_identifier("dir").unwrap();
        assert_eq!(registry.resolve("dir"), None);
        assert!(matches!(
            registry.remove_identifier("dir"),
            Err(VfsError::NotFound(_))
        ));
    }

    #[test]
    fn parse_line_classifies() {
        let mut registry = CommandRegistry::new();
        registry.add_identifier("mkdir", 4).unwrap();

        assert_eq!(registry.parse_line(""), Command::Empty);
        assert_eq!(
            registry.parse_line("mkdir music"),
            Command::Verb(4, vec!["music".to_string()])
        );
        assert_eq!(
            registry.parse_line("mkfs /dev/sda"),
            Command::Unknown("mkfs".to_string())
        );
    }

    #[test]
    fn registry_persists_and_flags_first_start() {
        let dir = TempDir::new().unwrap();
        let mut saver = Saver::new(SaverOptions::in_dir(dir.path())).unwrap();
        saver.initialize().unwrap();

        let mut registry = CommandRegistry::new();
        registry.load(&saver).unwrap();
        assert!(registry.is_first_start());

        registry.add_identifier("ls", 1).unwrap();
        registry.add_identifier("tree", 2).unwrap();
        registry.save(&mut saver).unwrap();

        let mut reloaded = CommandRegistry::new();
        reloaded.load(&saver).unwrap();
        assert!(!reloaded.is_first_start());
        assert_eq!(reloaded.resolve("tree"), Some(2));
    }
}

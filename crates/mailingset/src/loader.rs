//! Reads the list definition files and the symbols file off disk and
//! builds a [`mailingset_core::Universe`] from them. This is the "external
//! provider" the core crate's list store describes: the core crate never
//! touches a filesystem path itself, it only ever sees `(name, lines)`
//! pairs and a symbol map.

use anyhow::{Context, Result};
use mailingset_core::Universe;
use std::collections::HashMap;
use std::path::Path;

/// A list name is restricted to identifier characters, matching the
/// grammar's identifier token, since it must also be usable unquoted as a
/// leaf in a recipient expression.
fn is_list_filename(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

/// Reads every list definition file in `lists_dir`. The filename (minus
/// any extension) is the list name; each non-blank, non-comment line is a
/// raw member line handed unparsed to `Universe::build`.
fn read_list_dir(lists_dir: &Path) -> Result<Vec<(String, Vec<String>)>> {
    let mut lists = Vec::new();

    let entries = std::fs::read_dir(lists_dir)
        .with_context(|| format!("reading lists directory {}", lists_dir.display()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !is_list_filename(name) {
            tracing::warn!("skipping {}: not a valid list name", path.display());
            continue;
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading list file {}", path.display()))?;
        let lines: Vec<String> = text
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| l.to_string())
            .collect();

        lists.push((name.to_string(), lines));
    }

    Ok(lists)
}

/// Parses the symbols file: lines of the form `listname:SymbolText`.
fn read_symbols_file(symbols_file: &Path) -> Result<HashMap<String, String>> {
    let mut symbols = HashMap::new();

    if !symbols_file.exists() {
        return Ok(symbols);
    }

    let text = std::fs::read_to_string(symbols_file)
        .with_context(|| format!("reading symbols file {}", symbols_file.display()))?;

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, symbol)) = line.split_once(':') else {
            anyhow::bail!(
                "{}:{}: expected `listname:SymbolText`, got {line:?}",
                symbols_file.display(),
                lineno + 1
            );
        };
        symbols.insert(name.trim().to_lowercase(), symbol.trim().to_string());
    }

    Ok(symbols)
}

/// Builds the universe from the `data.lists_dir`/`data.symbols_file`
/// configuration, failing fatally (per the core's startup-error
/// contract) on a malformed file or a cycle in the list graph.
pub fn load_universe(lists_dir: &Path, symbols_file: &Path) -> Result<Universe> {
    let lists = read_list_dir(lists_dir)?;
    let symbols = read_symbols_file(symbols_file)?;
    Universe::build(&lists, &symbols).context("building universe from list definitions")
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_lists_and_symbols_from_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sf"),
            "# comment\n\"Bob Brown\" <bob@example.com>\n\ncat\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("cat"),
            "\"Alice Smith\" <alice@example.com>\n",
        )
        .unwrap();

        let symbols_file = dir.path().join("symbols");
        let mut f = std::fs::File::create(&symbols_file).unwrap();
        writeln!(f, "sf:SF").unwrap();
        writeln!(f, "cat:Cat").unwrap();
        drop(f);

        let universe = load_universe(dir.path(), &symbols_file).unwrap();
        let resolved = universe.resolve("sf").unwrap();
        k9::assert_equal!(resolved.contains("bob@example.com"), true);
        k9::assert_equal!(resolved.contains("alice@example.com"), true);
        k9::assert_equal!(universe.symbol_for("sf"), Some("SF"));
    }
}

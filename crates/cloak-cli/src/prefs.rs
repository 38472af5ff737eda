use std::io::Write;

use cloak_core::{
    codec::{Value, ValueKind},
    store::PlainStore,
};
use cloak_storage::SecurePreferences;
use color_eyre::{
    eyre::{bail, eyre, WrapErr},
    Result,
};
use tracing::info;

/// Turn command-line words into a typed value. Sets take every word as an
/// element; strings are joined with spaces; other kinds take one word.
pub fn parse_value(kind: ValueKind, words: &[String]) -> Result<Value> {
    let value = match kind {
        ValueKind::StringSet => Value::StringSet(words.iter().cloned().collect()),
        ValueKind::String => Value::String(words.join(" ")),
        ValueKind::Int => Value::Int(single(kind, words)?.parse().wrap_err("not an int")?),
        ValueKind::Long => Value::Long(single(kind, words)?.parse().wrap_err("not a long")?),
        ValueKind::Float => Value::Float(single(kind, words)?.parse().wrap_err("not a float")?),
        ValueKind::Bool => Value::Bool(
            single(kind, words)?
                .parse()
                .wrap_err("expected true or false")?,
        ),
    };
    Ok(value)
}

fn single(kind: ValueKind, words: &[String]) -> Result<&str> {
    match words {
        [word] => Ok(word.as_str()),
        _ => bail!("a {kind} takes exactly one value, got {}", words.len()),
    }
}

pub fn put<S: PlainStore>(
    prefs: &SecurePreferences<S>,
    key: &str,
    kind: ValueKind,
    words: &[String],
) -> Result<()> {
    let value = parse_value(kind, words)?;
    let mut editor = prefs.edit();
    editor.put_value(key, &value)?;
    commit(editor.commit(), "put")?;
    info!(key, %kind, "stored preference");
    Ok(())
}

pub fn get<S: PlainStore>(
    prefs: &SecurePreferences<S>,
    key: &str,
    kind: ValueKind,
    default: Option<&str>,
    out: &mut impl Write,
) -> Result<()> {
    let value = match prefs.get_value(key, kind)? {
        Some(value) => value,
        None => match default {
            Some(default) => parse_value(kind, &split_default(kind, default))?,
            None => bail!("no preference stored under {key}"),
        },
    };
    writeln!(out, "{value}")?;
    Ok(())
}

pub fn remove<S: PlainStore>(prefs: &SecurePreferences<S>, key: &str) -> Result<()> {
    commit(prefs.edit().remove(key).commit(), "remove")
}

pub fn clear<S: PlainStore>(prefs: &SecurePreferences<S>) -> Result<()> {
    commit(prefs.edit().clear().commit(), "clear")
}

pub fn contains<S: PlainStore>(
    prefs: &SecurePreferences<S>,
    key: &str,
    out: &mut impl Write,
) -> Result<()> {
    writeln!(out, "{}", prefs.contains(key))?;
    Ok(())
}

pub fn keys<S: PlainStore>(prefs: &SecurePreferences<S>, out: &mut impl Write) -> Result<()> {
    let keys = prefs.store().keys();
    if keys.is_empty() {
        writeln!(out, "No preferences yet. Add one with `cloak put <key> <value>`.")?;
        return Ok(());
    }
    for key in keys {
        writeln!(out, "{key}")?;
    }
    Ok(())
}

/// Put, read back and remove a probe value.
pub fn health<S: PlainStore>(prefs: &SecurePreferences<S>) -> Result<()> {
    let probe_key = "health/probe";
    let payload = "ok";

    commit(
        prefs.edit().put_string(probe_key, payload)?.commit(),
        "health probe put",
    )?;
    let round_trip = prefs.get_string(probe_key, "")?;
    commit(prefs.edit().remove(probe_key).commit(), "health probe remove")?;

    if round_trip != payload {
        bail!("storage round-trip failed");
    }
    Ok(())
}

fn split_default(kind: ValueKind, default: &str) -> Vec<String> {
    match kind {
        ValueKind::StringSet => default
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => vec![default.to_string()],
    }
}

fn commit(committed: bool, operation: &str) -> Result<()> {
    if committed {
        Ok(())
    } else {
        Err(eyre!("{operation} was applied in memory but could not be written to disk"))
    }
}

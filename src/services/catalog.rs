use rusqlite::Connection;

use crate::db::queries;
use crate::models::Named;
use crate::services::extractor::ExtractError;

/// Lowercased, accent-free, single-spaced form used for name comparison. Punctuation
/// becomes a word break.
pub fn normalize(text: &str) -> String {
    deunicode::deunicode(text)
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// How closely a stored name matches the raw text; lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchRank {
    Exact,
    /// The stored name contains the raw text ("corte de cabelo" in "Corte de Cabelo Masculino").
    StoredContainsRaw,
    /// The raw text contains the stored name as whole words ("Escova progressiva" for "Escova").
    RawContainsStored,
}

fn contains_words(haystack: &str, needle: &str) -> bool {
    let haystack: Vec<&str> = haystack.split(' ').collect();
    let needle: Vec<&str> = needle.split(' ').collect();
    haystack.windows(needle.len()).any(|w| w == needle.as_slice())
}

fn rank(name: &str, needle: &str) -> Option<MatchRank> {
    if name.is_empty() {
        None
    } else if name == needle {
        Some(MatchRank::Exact)
    } else if name.contains(needle) {
        Some(MatchRank::StoredContainsRaw)
    } else if contains_words(needle, name) {
        Some(MatchRank::RawContainsStored)
    } else {
        None
    }
}

/// Case- and accent-insensitive name match. Candidates are ranked exact first, then stored
/// names containing the raw text, then stored names appearing as whole words in the raw
/// text. Candidates must be ordered by id; within the best rank the lowest id wins.
pub fn match_by_name<'a, T: Named>(candidates: &'a [T], raw: &str) -> Option<&'a T> {
    let needle = normalize(raw);
    if needle.is_empty() {
        return None;
    }

    let ranked: Vec<(MatchRank, &T)> = candidates
        .iter()
        .filter_map(|c| rank(&normalize(c.name()), &needle).map(|r| (r, c)))
        .collect();
    let best = ranked.iter().map(|(r, _)| *r).min()?;

    let mut matches = ranked
        .iter()
        .filter(|(r, _)| *r == best)
        .map(|(_, c)| *c);

    let first = matches.next()?;
    let others: Vec<i64> = matches.map(|c| c.id()).collect();
    if !others.is_empty() {
        tracing::warn!(
            raw,
            rank = ?best,
            chosen = first.id(),
            ignored = ?others,
            "ambiguous catalog match, using lowest id"
        );
    }
    Some(first)
}

pub fn resolve_service(
    conn: &Connection,
    company_id: i64,
    service_name_raw: &str,
) -> anyhow::Result<Result<i64, ExtractError>> {
    let services = queries::list_services(conn, company_id)?;
    Ok(match_by_name(&services, service_name_raw)
        .map(|s| s.id)
        .ok_or(ExtractError::NotFound))
}

pub fn resolve_professional(
    conn: &Connection,
    company_id: i64,
    professional_name_raw: &str,
) -> anyhow::Result<Result<i64, ExtractError>> {
    let professionals = queries::list_professionals(conn, company_id)?;
    Ok(match_by_name(&professionals, professional_name_raw)
        .map(|p| p.id)
        .ok_or(ExtractError::NotFound))
}

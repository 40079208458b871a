//! Derivation of a concrete container name from a `ten` claim that carries a
//! regular expression.
//!
//! A token whose `ten` claim is `/^wt-1234-[0-1]$/` is valid for any container
//! matching that pattern.  To address one of them, we generate a single matching
//! string, always taking the lowest choice: the first alternation branch, the
//! minimum repetition count and the lowest character of each class (preferring
//! printable ASCII).  Identical patterns therefore always yield identical names.
use regex_syntax::hir::{Class, ClassUnicode, ClassUnicodeRange, Hir, HirKind};
use regex_syntax::Parser;
use thiserror::Error;

const PRINTABLE_START: char = ' ';
const PRINTABLE_END: char = '~';
const MAX_LEN: usize = 512;

#[derive(Debug, Error)]
pub enum DeriveError {
    #[error(transparent)]
    Syntax(#[from] regex_syntax::Error),

    #[error("pattern cannot match any string")]
    Unmatchable,

    #[error("shortest match of pattern is longer than 512 bytes")]
    TooLong,
}

/// Extract the pattern from a claim of the form `/pattern/`, if it is one.
pub(crate) fn pattern_of(claim: &str) -> Option<&str> {
    claim
        .strip_prefix('/')
        .and_then(|rest| rest.strip_suffix('/'))
        .filter(|inner| !inner.is_empty())
}

/// Generate the lowest string matched by `pattern`.
pub fn derive(pattern: &str) -> Result<String, DeriveError> {
    let hir = Parser::new().parse(pattern)?;
    let mut out = Vec::new();
    emit(&hir, &mut out)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn emit(hir: &Hir, out: &mut Vec<u8>) -> Result<(), DeriveError> {
    match hir.kind() {
        HirKind::Empty | HirKind::Look(_) => Ok(()),
        HirKind::Literal(lit) => {
            out.extend_from_slice(&lit.0);
            check_len(out)
        }
        HirKind::Class(Class::Unicode(class)) => {
            let c = lowest_char(class).ok_or(DeriveError::Unmatchable)?;
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            Ok(())
        }
        HirKind::Class(Class::Bytes(class)) => {
            let printable = class
                .ranges()
                .iter()
                .flat_map(|r| r.start()..=r.end())
                .find(|b| (PRINTABLE_START as u8..=PRINTABLE_END as u8).contains(b));
            let b = printable
                .or_else(|| class.ranges().first().map(|r| r.start()))
                .ok_or(DeriveError::Unmatchable)?;
            out.push(b);
            Ok(())
        }
        HirKind::Repetition(rep) => {
            for _ in 0..rep.min {
                let before = out.len();
                emit(&rep.sub, out)?;
                if out.len() == before {
                    break;
                }
                check_len(out)?;
            }
            Ok(())
        }
        HirKind::Capture(cap) => emit(&cap.sub, out),
        HirKind::Concat(subs) => subs.iter().try_for_each(|sub| emit(sub, out)),
        HirKind::Alternation(subs) => match subs.first() {
            Some(first) => emit(first, out),
            None => Err(DeriveError::Unmatchable),
        },
    }
}

fn check_len(out: &[u8]) -> Result<(), DeriveError> {
    if out.len() > MAX_LEN {
        Err(DeriveError::TooLong)
    } else {
        Ok(())
    }
}

fn lowest_char(class: &ClassUnicode) -> Option<char> {
    let mut printable = class.clone();
    printable.intersect(&ClassUnicode::new([ClassUnicodeRange::new(
        PRINTABLE_START,
        PRINTABLE_END,
    )]));
    printable
        .ranges()
        .first()
        .or_else(|| class.ranges().first())
        .map(|r| r.start())
}

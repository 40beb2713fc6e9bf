//! Identity Matcher
//!
//! Pairs Jellyfin items with Plex items that point at the same physical file.
//!
//! ## Overview
//!
//! Matching runs in two stages and only ever produces a partial bijection:
//! every item takes part in at most one [`MatchedPair`], and whenever more than
//! one pairing is plausible the items are left unmatched.
//!
//! 1. **Exact**: items are grouped by [`FileIdentity`] (size plus the
//!    branch-independent relative path). A group holding exactly one item of
//!    each server yields a candidate. A candidate is accepted only if neither
//!    item has a different candidate partner through another of its paths.
//!    Groups holding several items of one server make every item in them
//!    ambiguous.
//! 2. **Loose** (optional): items that found no counterpart at all are paired
//!    by equal size and closest modification time. Content hashes, when both
//!    sides have one, must agree. A pairing is accepted only when each side is
//!    the other's unique best candidate.

use crate::resolver::ResolvedItem;
use bridge_traits::attributes::MediaFile;
use bridge_traits::catalog::LibraryItem;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use tracing::{debug, info};

/// Exact cross-server fingerprint of a physical file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileIdentity {
    pub size: u64,
    pub relative_path: PathBuf,
}

impl FileIdentity {
    pub fn of(file: &MediaFile) -> Self {
        Self {
            size: file.size,
            relative_path: file.relative_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    /// Same size and same branch-independent path
    Exact,
    /// Same size, closest modification time, unique on both sides
    SizeAndMtime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPair {
    pub jellyfin: LibraryItem,
    pub plex: LibraryItem,
    pub confidence: MatchConfidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReason {
    /// No counterpart exists on the other server
    Absent,
    /// More than one counterpart is plausible
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmatchedItem {
    pub item: LibraryItem,
    pub reason: UnmatchedReason,
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub pairs: Vec<MatchedPair>,
    pub unmatched: Vec<UnmatchedItem>,
}

#[derive(Debug, Clone, Copy)]
pub struct IdentityMatcher {
    loose_matching: bool,
}

impl Default for IdentityMatcher {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Per-side bookkeeping during a match
struct Side {
    items: Vec<ResolvedItem>,
    identities: Vec<BTreeSet<FileIdentity>>,
    ambiguous: HashSet<usize>,
    partner: Vec<Option<(usize, MatchConfidence)>>,
}

impl Side {
    fn new(mut items: Vec<ResolvedItem>) -> Self {
        items.sort_by(|a, b| a.item.id.cmp(&b.item.id));
        let identities = items
            .iter()
            .map(|resolved| resolved.files.iter().map(FileIdentity::of).collect())
            .collect();
        let partner = vec![None; items.len()];

        Self {
            items,
            identities,
            ambiguous: HashSet::new(),
            partner,
        }
    }

    fn is_absent(&self, index: usize) -> bool {
        self.partner[index].is_none() && !self.ambiguous.contains(&index)
    }
}

impl IdentityMatcher {
    pub fn new(loose_matching: bool) -> Self {
        Self { loose_matching }
    }

    /// Match resolved items of both servers.
    ///
    /// Items without any resolved file are ignored; callers report them as
    /// unresolvable before matching.
    pub fn match_items(&self, jellyfin: Vec<ResolvedItem>, plex: Vec<ResolvedItem>) -> MatchOutcome {
        let mut jellyfin = Side::new(jellyfin.into_iter().filter(ResolvedItem::is_resolved).collect());
        let mut plex = Side::new(plex.into_iter().filter(ResolvedItem::is_resolved).collect());

        let exact = match_exact(&mut jellyfin, &mut plex);
        let loose = if self.loose_matching {
            match_loose(&mut jellyfin, &mut plex)
        } else {
            0
        };

        info!(
            exact,
            loose,
            jellyfin_items = jellyfin.items.len(),
            plex_items = plex.items.len(),
            "Identity matching complete"
        );

        collect_outcome(jellyfin, plex)
    }
}

fn match_exact(jellyfin: &mut Side, plex: &mut Side) -> usize {
    let mut groups: BTreeMap<&FileIdentity, (BTreeSet<usize>, BTreeSet<usize>)> = BTreeMap::new();
    for (index, identities) in jellyfin.identities.iter().enumerate() {
        for identity in identities {
            groups.entry(identity).or_default().0.insert(index);
        }
    }
    for (index, identities) in plex.identities.iter().enumerate() {
        for identity in identities {
            groups.entry(identity).or_default().1.insert(index);
        }
    }

    let mut jellyfin_candidates: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
    let mut plex_candidates: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
    let mut jellyfin_ambiguous = HashSet::new();
    let mut plex_ambiguous = HashSet::new();

    for (identity, (j_items, p_items)) in &groups {
        if j_items.is_empty() || p_items.is_empty() {
            continue;
        }
        if j_items.len() > 1 || p_items.len() > 1 {
            debug!(
                relative_path = %identity.relative_path.display(),
                jellyfin = j_items.len(),
                plex = p_items.len(),
                "Ambiguous identity group"
            );
            jellyfin_ambiguous.extend(j_items.iter().copied());
            plex_ambiguous.extend(p_items.iter().copied());
            continue;
        }

        let (j, p) = (first(j_items), first(p_items));
        jellyfin_candidates.entry(j).or_default().insert(p);
        plex_candidates.entry(p).or_default().insert(j);
    }

    let mut matched = 0;
    for (&j, partners) in &jellyfin_candidates {
        let p = first(partners);
        let unique = partners.len() == 1 && plex_candidates.get(&p).is_some_and(|back| back.len() == 1);
        let clean = !jellyfin_ambiguous.contains(&j) && !plex_ambiguous.contains(&p);

        if unique && clean {
            jellyfin.partner[j] = Some((p, MatchConfidence::Exact));
            plex.partner[p] = Some((j, MatchConfidence::Exact));
            matched += 1;
        } else {
            jellyfin_ambiguous.insert(j);
            plex_ambiguous.extend(partners.iter().copied());
        }
    }

    jellyfin.ambiguous = jellyfin_ambiguous;
    plex.ambiguous = plex_ambiguous;
    matched
}

/// Size plus modification time of one file; hash compared when both present
fn loose_distance(a: &MediaFile, b: &MediaFile) -> Option<i64> {
    if a.size != b.size {
        return None;
    }
    if let (Some(ha), Some(hb)) = (&a.content_hash, &b.content_hash) {
        if ha != hb {
            return None;
        }
    }
    let (ma, mb) = (a.modified_at?, b.modified_at?);
    Some((ma - mb).num_milliseconds().abs())
}

fn item_distance(a: &ResolvedItem, b: &ResolvedItem) -> Option<i64> {
    a.files
        .iter()
        .flat_map(|fa| b.files.iter().filter_map(move |fb| loose_distance(fa, fb)))
        .min()
}

/// The unique closest candidate, or `None` when there is none or a tie
fn unique_best(distances: impl Iterator<Item = (usize, i64)>) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;
    let mut tied = false;
    for (index, distance) in distances {
        match best {
            Some((_, current)) if distance > current => {}
            Some((_, current)) if distance == current => tied = true,
            _ => {
                best = Some((index, distance));
                tied = false;
            }
        }
    }
    if tied {
        None
    } else {
        best.map(|(index, _)| index)
    }
}

fn match_loose(jellyfin: &mut Side, plex: &mut Side) -> usize {
    let open_j: Vec<usize> = (0..jellyfin.items.len()).filter(|&j| jellyfin.is_absent(j)).collect();
    let open_p: Vec<usize> = (0..plex.items.len()).filter(|&p| plex.is_absent(p)).collect();
    if open_j.is_empty() || open_p.is_empty() {
        return 0;
    }

    let distances: BTreeMap<(usize, usize), i64> = open_j
        .iter()
        .flat_map(|&j| open_p.iter().map(move |&p| (j, p)))
        .filter_map(|(j, p)| item_distance(&jellyfin.items[j], &plex.items[p]).map(|d| ((j, p), d)))
        .collect();

    let mut matched = 0;
    for &j in &open_j {
        let Some(p) = unique_best(
            distances
                .iter()
                .filter(|((dj, _), _)| *dj == j)
                .map(|((_, dp), d)| (*dp, *d)),
        ) else {
            continue;
        };

        let back = unique_best(
            distances
                .iter()
                .filter(|((_, dp), _)| *dp == p)
                .map(|((dj, _), d)| (*dj, *d)),
        );

        if back == Some(j) {
            jellyfin.partner[j] = Some((p, MatchConfidence::SizeAndMtime));
            plex.partner[p] = Some((j, MatchConfidence::SizeAndMtime));
            matched += 1;
        }
    }
    matched
}

fn collect_outcome(jellyfin: Side, plex: Side) -> MatchOutcome {
    let mut outcome = MatchOutcome::default();

    let Side {
        items: plex_items,
        ambiguous: plex_ambiguous,
        partner: plex_partner,
        ..
    } = plex;
    let mut plex_slots: Vec<Option<LibraryItem>> = plex_items.into_iter().map(|r| Some(r.item)).collect();

    for (j, resolved) in jellyfin.items.into_iter().enumerate() {
        match jellyfin.partner[j] {
            Some((p, confidence)) => {
                if let Some(plex_item) = plex_slots[p].take() {
                    outcome.pairs.push(MatchedPair {
                        jellyfin: resolved.item,
                        plex: plex_item,
                        confidence,
                    });
                }
            }
            None => outcome.unmatched.push(UnmatchedItem {
                item: resolved.item,
                reason: reason(jellyfin.ambiguous.contains(&j)),
            }),
        }
    }

    for (p, slot) in plex_slots.into_iter().enumerate() {
        if let (Some(item), None) = (slot, plex_partner[p]) {
            outcome.unmatched.push(UnmatchedItem {
                item,
                reason: reason(plex_ambiguous.contains(&p)),
            });
        }
    }

    outcome
}

fn reason(ambiguous: bool) -> UnmatchedReason {
    if ambiguous {
        UnmatchedReason::Ambiguous
    } else {
        UnmatchedReason::Absent
    }
}

fn first(set: &BTreeSet<usize>) -> usize {
    set.iter().next().copied().unwrap_or_default()
}

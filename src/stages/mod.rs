//! Pipeline stages that progressively relabel the shared edge map.
//!
//! Each stage consumes the map state its predecessor left behind:
//! [`matching`] turns candidates into groups, [`assign`] repairs boundary
//! and continuity defects, [`gapclose`] is the optional legacy close-slits
//! path, [`tcrude`] re-centers every group through noise and gaps,
//! [`sync`] pairs left and right edges into slits, and [`trim`] drops
//! off-detector or too-narrow slits from the final curves.

pub mod assign;
pub mod gapclose;
pub mod matching;
pub mod sync;
pub mod tcrude;
pub mod trim;

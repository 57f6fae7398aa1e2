//! Quick-save change detection.
//!
//! The digest is SHA-256 over the block's layout version followed by its
//! stable byte layout. Comparing digests tells the gateway whether the
//! quick-save columns need rewriting.

use sha2::{Digest, Sha256};
use wlm_types::{LayoutWriter, QsDigest, QuickSave};

/// Digest a quick-save block.
pub fn hash<Q: QuickSave>(block: &Q) -> QsDigest {
    let mut writer = LayoutWriter::new();
    writer.u8(Q::LAYOUT_VERSION);
    block.write_layout(&mut writer);
    let mut hasher = Sha256::new();
    hasher.update(writer.as_bytes());
    QsDigest(hasher.finalize().into())
}

/// Compare `block` against the stored digest and store the new one.
///
/// A missing stored digest counts as changed.
pub fn has_changed<Q: QuickSave>(stored: &mut Option<QsDigest>, block: &Q) -> bool {
    let current = hash(block);
    let changed = stored.is_none_or(|previous| previous != current);
    *stored = Some(current);
    changed
}

//! Bulk image transfer channel.
//!
//! Moves checkpoint artifacts that are not visible on the destination
//! filesystem, on a dedicated TCP port so large transfers never multiplex
//! with control calls. Wire format, one file per connection:
//!
//! ```text
//! [u32 little-endian path length][path bytes][raw file bytes until EOF]
//! ```
//!
//! The sender closes the connection after the last byte; there is no
//! response channel.

mod receiver;
mod sender;

pub use receiver::{ReceiverOptions, TransferListener};
pub use sender::{BulkSender, BulkTransfer, pack_image_dir, send_file};

/// Name of the archive the sender builds inside the image directory.
pub const IMAGE_ARCHIVE_NAME: &str = "img.tar.gz";

/// Upper bound on the declared destination path length. Anything larger is
/// a malformed envelope.
pub const MAX_PATH_LEN: usize = 4096;

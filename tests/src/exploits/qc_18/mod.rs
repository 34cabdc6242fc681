//! # Peer Connection Exploits
//!
//! | Attack | Expected outcome |
//! |--------|------------------|
//! | Replayed message counter | `Unauthorized` |
//! | Token minted for another receiver | `Unauthorized` |
//! | Token reused for a different payload | `Unauthorized` |
//! | Frame header announcing a huge envelope | `Exception` |
//! | Undecodable frame body | `Exception` |
//! | Envelope with a foreign protocol version | `Exception` |
//! | Handshake request after establishment | ignored |
//! | Handshake from a quarantined address | no response |

pub mod authorization_bypass;
pub mod framing_abuse;

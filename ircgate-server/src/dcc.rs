//! DCC transfer bookkeeping.
//!
//! A session owns one [`DccList`]. Transfers refer to their peer by
//! [`NickId`]; when the peer leaves the directory the reference is cleared
//! and the transfer keeps running on its own. Finished transfers are purged
//! at the start of every pass over the list.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::directory::NickId;

/// Backend-assigned identity of a transfer.
pub type DccId = String;

/// Invoked once when a transfer completes.
pub type DccCallback = Box<dyn FnOnce(&DccTransfer) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DccDirection {
    /// The gateway offers a file to the client.
    Send,
    /// The gateway retrieves a file the client offers.
    Get,
}

pub struct DccTransfer {
    id: DccId,
    pub direction: DccDirection,
    pub peer: Option<NickId>,
    pub filename: String,
    pub size: u64,
    pub addr: Option<SocketAddr>,
    pub transferred: u64,
    pub finished: bool,
    on_complete: Option<DccCallback>,
}

impl DccTransfer {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for DccTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DccTransfer")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("peer", &self.peer)
            .field("filename", &self.filename)
            .field("size", &self.size)
            .field("addr", &self.addr)
            .field("transferred", &self.transferred)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Progress report from a backend for one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DccUpdate {
    pub transferred: u64,
    pub finished: bool,
    /// Drop the transfer from the list right away.
    pub destroy: bool,
}

/// What an update did to its transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DccEvent {
    Progress { transferred: u64, size: u64 },
    Finished,
    Destroyed,
}

#[derive(Debug, Default)]
pub struct DccList {
    transfers: Vec<DccTransfer>,
}

impl DccList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_send(
        &mut self,
        id: &str,
        peer: NickId,
        filename: &str,
        size: u64,
        addr: SocketAddr,
    ) {
        self.push(id, DccDirection::Send, peer, filename, size, Some(addr), None);
    }

    pub fn create_get(
        &mut self,
        id: &str,
        peer: NickId,
        filename: &str,
        size: u64,
        addr: Option<SocketAddr>,
        on_complete: DccCallback,
    ) {
        self.push(id, DccDirection::Get, peer, filename, size, addr, Some(on_complete));
    }

    fn push(
        &mut self,
        id: &str,
        direction: DccDirection,
        peer: NickId,
        filename: &str,
        size: u64,
        addr: Option<SocketAddr>,
        on_complete: Option<DccCallback>,
    ) {
        // A reused id replaces the stale transfer so updates reach the new one.
        if let Some(pos) = self.transfers.iter().position(|t| t.id == id) {
            tracing::debug!(transfer = id, "Replacing transfer with reused id");
            self.transfers.remove(pos);
        }
        self.transfers.push(DccTransfer {
            id: id.to_string(),
            direction,
            peer: Some(peer),
            filename: filename.to_string(),
            size,
            addr,
            transferred: 0,
            finished: false,
            on_complete,
        });
    }

    /// Apply a backend update to the matching transfer only.
    pub fn update(&mut self, id: &str, update: DccUpdate) -> Option<DccEvent> {
        self.purge_finished();
        let pos = self.transfers.iter().position(|t| t.id == id)?;
        let transfer = &mut self.transfers[pos];
        transfer.transferred = update.transferred;

        let mut event = DccEvent::Progress {
            transferred: transfer.transferred,
            size: transfer.size,
        };
        if update.finished {
            transfer.finished = true;
            if let Some(callback) = transfer.on_complete.take() {
                callback(transfer);
            }
            event = DccEvent::Finished;
        }
        if update.destroy {
            self.transfers.remove(pos);
            event = DccEvent::Destroyed;
        }
        Some(event)
    }

    /// Clear the peer of every transfer pointing at `peer`.
    pub fn peer_removed(&mut self, peer: NickId) {
        self.purge_finished();
        for transfer in self.transfers.iter_mut().filter(|t| t.peer == Some(peer)) {
            transfer.peer = None;
        }
    }

    fn purge_finished(&mut self) {
        self.transfers.retain(|t| !t.finished);
    }

    pub fn get(&self, id: &str) -> Option<&DccTransfer> {
        self.transfers.iter().find(|t| t.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DccTransfer> {
        self.transfers.iter()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn clear(&mut self) {
        self.transfers.clear();
    }
}

/// A `DCC SEND` offer as carried in CTCP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DccOffer {
    pub filename: String,
    pub addr: SocketAddr,
    pub size: u64,
}

impl DccOffer {
    /// CTCP body: `DCC SEND "<file>" <ip> <port> <size>`. IPv4 addresses
    /// use the decimal network-order form.
    pub fn to_ctcp(&self) -> String {
        let ip = match self.addr.ip() {
            IpAddr::V4(v4) => u32::from(v4).to_string(),
            IpAddr::V6(v6) => v6.to_string(),
        };
        format!(
            "DCC SEND \"{}\" {ip} {} {}",
            self.filename,
            self.addr.port(),
            self.size
        )
    }

    /// Parse a CTCP body. Quoted and bare filenames are accepted; path
    /// components are stripped from the name.
    pub fn parse(ctcp: &str) -> Option<Self> {
        let content = ctcp.strip_prefix("DCC SEND ")?;
        let (filename, rest) = if let Some(quoted) = content.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], quoted[end + 1..].trim())
        } else {
            let space = content.find(' ')?;
            (&content[..space], content[space + 1..].trim())
        };

        let parts: Vec<&str> = rest.split_whitespace().collect();
        if parts.len() < 2 {
            return None;
        }
        let ip = match parts[0].parse::<u32>() {
            Ok(decimal) => IpAddr::V4(Ipv4Addr::from(decimal)),
            Err(_) => parts[0].parse::<IpAddr>().ok()?,
        };
        let port: u16 = parts[1].parse().ok()?;
        let size: u64 = match parts.get(2) {
            Some(s) => s.parse().ok()?,
            None => 0,
        };

        let filename = sanitize_filename(filename)?;
        Some(Self {
            filename,
            addr: SocketAddr::new(ip, port),
            size,
        })
    }
}

fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim_start_matches('.').trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn addr() -> SocketAddr {
        "192.168.1.10:5000".parse().unwrap()
    }

    #[test]
    fn update_reaches_only_its_transfer() {
        let mut list = DccList::new();
        list.create_send("a", NickId(1), "a.txt", 10, addr());
        list.create_send("b", NickId(1), "b.txt", 20, addr());
        let event = list.update("b", DccUpdate { transferred: 5, ..Default::default() });
        assert_eq!(event, Some(DccEvent::Progress { transferred: 5, size: 20 }));
        assert_eq!(list.get("a").unwrap().transferred, 0);
        assert_eq!(list.update("zz", DccUpdate::default()), None);
    }

    #[test]
    fn finished_transfers_are_purged_on_next_pass() {
        let mut list = DccList::new();
        list.create_send("a", NickId(1), "a.txt", 10, addr());
        list.create_send("b", NickId(1), "b.txt", 10, addr());
        let done = DccUpdate { transferred: 10, finished: true, destroy: false };
        assert_eq!(list.update("a", done), Some(DccEvent::Finished));
        assert_eq!(list.len(), 2);
        list.update("b", DccUpdate { transferred: 1, ..Default::default() });
        assert_eq!(list.len(), 1);
        assert!(list.get("a").is_none());
    }

    #[test]
    fn reused_id_replaces_old_transfer() {
        let mut list = DccList::new();
        list.create_send("a", NickId(1), "old.txt", 10, addr());
        list.create_send("a", NickId(2), "new.txt", 30, addr());
        assert_eq!(list.len(), 1);
        let event = list.update("a", DccUpdate { transferred: 7, ..Default::default() });
        assert_eq!(event, Some(DccEvent::Progress { transferred: 7, size: 30 }));
        assert_eq!(list.get("a").unwrap().filename, "new.txt");
        assert_eq!(list.get("a").unwrap().peer, Some(NickId(2)));
    }

    #[test]
    fn destroy_removes_immediately() {
        let mut list = DccList::new();
        list.create_send("a", NickId(1), "a.txt", 10, addr());
        let update = DccUpdate { transferred: 3, finished: false, destroy: true };
        assert_eq!(list.update("a", update), Some(DccEvent::Destroyed));
        assert!(list.is_empty());
    }

    #[test]
    fn completion_callback_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut list = DccList::new();
        list.create_get(
            "get-1",
            NickId(2),
            "photo.jpg",
            4,
            None,
            Box::new(move |t| {
                assert!(t.finished);
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let done = DccUpdate { transferred: 4, finished: true, destroy: false };
        list.update("get-1", done);
        list.update("get-1", done);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removing_peer_clears_reference_and_purges_finished() {
        let mut list = DccList::new();
        list.create_send("a", NickId(7), "a", 1, addr());
        list.create_send("b", NickId(7), "b", 1, addr());
        list.create_send("c", NickId(8), "c", 1, addr());
        list.update("c", DccUpdate { transferred: 1, finished: true, destroy: false });

        list.peer_removed(NickId(7));
        assert_eq!(list.len(), 2);
        assert_eq!(list.get("a").unwrap().peer, None);
        assert_eq!(list.get("b").unwrap().peer, None);
        assert!(list.get("c").is_none());
    }

    #[test]
    fn offer_ctcp_roundtrip() {
        let offer = DccOffer { filename: "notes.txt".into(), addr: addr(), size: 1234 };
        let body = offer.to_ctcp();
        assert_eq!(body, "DCC SEND \"notes.txt\" 3232235786 5000 1234");
        assert_eq!(DccOffer::parse(&body), Some(offer));
    }

    #[test]
    fn offer_parse_strips_paths_and_rejects_garbage() {
        let offer = DccOffer::parse("DCC SEND ../../etc/passwd 3232235786 5000 10").unwrap();
        assert_eq!(offer.filename, "passwd");
        assert!(DccOffer::parse("DCC SEND file.txt notanip 5000 10").is_none());
        assert!(DccOffer::parse("DCC CHAT chat 1 2").is_none());
        assert!(DccOffer::parse("DCC SEND \"..\" 1 2 3").is_none());
    }
}

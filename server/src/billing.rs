use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use backend::{Biller, BillingEntry, BillingError};
use parking_lot::Mutex;
use tracing::info;

/// Appends each entry to a file as one JSON line.
pub struct FileBiller {
    writer: Mutex<BufWriter<File>>,
}

impl FileBiller {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl Biller for FileBiller {
    fn bill(&self, entry: &BillingEntry) -> Result<(), BillingError> {
        let line = serde_json::to_string(entry).map_err(|e| BillingError::Rejected(e.to_string()))?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .map_err(|e| BillingError::Unavailable(e.to_string()))
    }
}

/// Logs each entry at info level.
pub struct LogBiller;

impl Biller for LogBiller {
    fn bill(&self, entry: &BillingEntry) -> Result<(), BillingError> {
        info!(
            session_id = entry.session_id,
            buyer_id = entry.buyer_id,
            slice = entry.slice_number,
            route = ?entry.route_type,
            price = entry.route_price.raw(),
            "billing entry"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::Nibblins;
    use wire::{ConnectionType, PlatformType, RouteType};

    fn entry(session_id: u64) -> BillingEntry {
        BillingEntry {
            timestamp: 1,
            buyer_id: 2,
            session_id,
            user_hash: 3,
            datacenter_id: 4,
            slice_number: 5,
            platform_type: PlatformType::Linux,
            connection_type: ConnectionType::Wired,
            route_type: RouteType::Direct,
            route_relay_ids: Vec::new(),
            relay_prices: Vec::new(),
            route_price: Nibblins::ZERO,
            envelope_bytes_up: 0,
            envelope_bytes_down: 0,
            direct_rtt: 30.0,
            direct_jitter: 1.0,
            direct_packet_loss: 0.0,
            next_rtt: 0.0,
            next_jitter: 0.0,
            next_packet_loss: 0.0,
            fallback_to_direct: false,
            fallback_flags: 0,
            tags: Vec::new(),
        }
    }

    #[test]
    fn file_biller_appends_json_lines() {
        let path = std::env::temp_dir().join(format!("nextroute-billing-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);
        {
            let biller = FileBiller::open(&path).unwrap();
            biller.bill(&entry(10)).unwrap();
            biller.bill(&entry(11)).unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        let ids: Vec<u64> = contents
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
            .map(|value| value["session_id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![10, 11]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn log_biller_accepts_everything() {
        assert!(LogBiller.bill(&entry(1)).is_ok());
    }
}

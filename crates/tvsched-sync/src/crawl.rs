use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::SyncResult;
use crate::listings::{DaySyncReport, ListingSynchronizer};

/// Result of a forward crawl. The last day is the one that stopped it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub start: NaiveDate,
    pub days: Vec<DaySyncReport>,
}

impl CrawlSummary {
    pub fn days_updated(&self) -> usize {
        self.days.iter().filter(|day| day.updated).count()
    }

    pub fn listings_upserted(&self) -> usize {
        self.days.iter().map(|day| day.listings_upserted).sum()
    }

    pub fn listings_removed(&self) -> usize {
        self.days.iter().map(|day| day.listings_removed).sum()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.days.last().map(|day| day.date)
    }
}

impl ListingSynchronizer {
    /// Synchronizes `start` and each following day until a day yields no
    /// listings. There is no other bound: the feed horizon ends the crawl.
    pub async fn update_from_date(&self, start: NaiveDate) -> SyncResult<CrawlSummary> {
        let mut summary = CrawlSummary {
            start,
            days: Vec::new(),
        };
        let mut date = start;
        loop {
            let report = self.sync_date(date).await?;
            let updated = report.updated;
            summary.days.push(report);
            if !updated {
                break;
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => {
                    warn!(%date, "calendar exhausted");
                    break;
                }
            }
        }
        info!(
            %start,
            days = summary.days.len(),
            upserted = summary.listings_upserted(),
            removed = summary.listings_removed(),
            "forward crawl finished"
        );
        Ok(summary)
    }
}

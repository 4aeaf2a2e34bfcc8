//! Read-only views over the queue.

use tapedeck_core::download::queue::average_throughput;
use tapedeck_core::{
    DownloadResult, DownloadTask, QueueSnapshot, QueueStats, RecordingStatus, TaskId, TaskStatus,
};

use super::DownloadManagerImpl;
use crate::queue::admission_cmp;

impl DownloadManagerImpl {
    /// Point-in-time view of running, waiting, paused and failed tasks.
    ///
    /// Queued tasks are listed in the order the scheduler would admit them.
    pub async fn queue_snapshot(&self) -> DownloadResult<QueueSnapshot> {
        let mut queued = self.store.list_by_status(TaskStatus::Queued).await?;
        queued.sort_by(admission_cmp);

        Ok(QueueSnapshot {
            active: self.store.list_by_status(TaskStatus::Downloading).await?,
            queued,
            paused: self.store.list_by_status(TaskStatus::Paused).await?,
            failed: self.store.list_by_status(TaskStatus::Failed).await?,
        })
    }

    pub async fn active_downloads(&self) -> DownloadResult<Vec<DownloadTask>> {
        Ok(self.store.list_by_status(TaskStatus::Downloading).await?)
    }

    pub async fn completed_downloads(&self) -> DownloadResult<Vec<DownloadTask>> {
        Ok(self.store.list_by_status(TaskStatus::Completed).await?)
    }

    pub async fn failed_downloads(&self) -> DownloadResult<Vec<DownloadTask>> {
        Ok(self.store.list_by_status(TaskStatus::Failed).await?)
    }

    /// Every task, in enqueue order.
    pub async fn all_tasks(&self) -> DownloadResult<Vec<DownloadTask>> {
        Ok(self.store.list_all().await?)
    }

    pub async fn get_task(&self, id: &TaskId) -> DownloadResult<Option<DownloadTask>> {
        Ok(self.store.get(id).await?)
    }

    /// Aggregate status of one recording's tracks.
    pub async fn recording_status(&self, recording_id: &str) -> DownloadResult<RecordingStatus> {
        let tasks = self.store.list_by_recording(recording_id).await?;
        Ok(RecordingStatus::from_tasks(recording_id, &tasks))
    }

    /// Counts per status, completed bytes and average throughput.
    pub async fn stats(&self) -> DownloadResult<QueueStats> {
        let mut stats = QueueStats::default();

        for status in TaskStatus::ALL {
            let count = self.store.count_by_status(status).await?;
            stats.total += count;
            match status {
                TaskStatus::Queued => stats.queued = count,
                TaskStatus::Downloading => stats.downloading = count,
                TaskStatus::Paused => stats.paused = count,
                TaskStatus::Completed => stats.completed = count,
                TaskStatus::Failed => stats.failed = count,
                TaskStatus::Cancelled => stats.cancelled = count,
            }
        }

        stats.total_bytes_downloaded = self.store.total_bytes_downloaded().await?;
        let completed = self.store.list_by_status(TaskStatus::Completed).await?;
        stats.average_throughput_bps = average_throughput(&completed);

        Ok(stats)
    }
}

use crate::types::{
    BatchCounts, BatchStatus, BatchingPhase, BatchingReport, BatchingSummary, RecipientCounts,
};

/// Aggregates per-stage batching progress into a single summary. Stages
/// without batches are ignored; if none is batched the status is `none`.
pub fn summarize_batching(report: &BatchingReport) -> BatchingSummary {
    let mut batches = BatchCounts::default();
    let mut recipients = RecipientCounts::default();
    let mut failed_recipients = 0u64;
    let mut processing = 0u64;

    for stage in report.stages.iter().filter(|s| s.uses_batching()) {
        let batch_recipients: u64 = stage.batches.iter().map(|b| b.recipients).sum();
        recipients.total += stage.total_recipients.max(batch_recipients);

        for batch in &stage.batches {
            batches.total += 1;
            match batch.status {
                BatchStatus::Completed => batches.completed += 1,
                BatchStatus::Failed => batches.failed += 1,
                BatchStatus::Processing => processing += 1,
                BatchStatus::Pending => {}
            }
            recipients.sent += batch.success_count;
            failed_recipients += batch.error_count;
        }
    }

    if batches.total == 0 {
        return BatchingSummary::default();
    }

    let finished = batches.completed + batches.failed;
    batches.pending = batches.total - finished;
    batches.percentage = (finished as f64 / batches.total as f64 * 1000.0).round() / 10.0;
    recipients.pending = recipients
        .total
        .saturating_sub(recipients.sent + failed_recipients);

    let status = if batches.pending == 0 {
        BatchingPhase::Completed
    } else if finished == 0 && processing == 0 {
        BatchingPhase::Pending
    } else {
        BatchingPhase::InProgress
    };

    BatchingSummary {
        status,
        batches,
        recipients,
    }
}

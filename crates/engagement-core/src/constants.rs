/// Pipeline constants

/// Tokens are refreshed once they are this close to expiry
pub const TOKEN_REFRESH_MARGIN_SECONDS: i64 = 300;

/// Upper bound on knowledge snippets handed to the AI judge
pub const KNOWLEDGE_SNIPPET_LIMIT: usize = 20;

/// Timeout for every outbound HTTP call
pub const HTTP_TIMEOUT_SECONDS: u64 = 30;

/// Reply sent when a lead shares an email address
pub const EMAIL_COLLECTED_REPLY: &str = "Thanks so much! I'll send everything over to your inbox shortly.";

/// Reply sent when a lead says they are not interested
pub const NOT_INTERESTED_REPLY: &str = "No worries at all, thanks for letting me know. Wishing you all the best!";

/// Verdict reason when the judge has no credentials and the draft passes unreviewed
pub const JUDGE_SKIPPED_REASON: &str = "AI review skipped: judge credentials not configured";

/// Verdict reason when the judge failed and the draft needs a human look
pub const JUDGE_FAILED_REASON: &str = "AI review failed: manual review required";

/// Failure reason when no posting credential could be obtained
pub const AUTH_REQUIRED_REASON: &str = "auth required: reconnect the platform account";

/// Subject line for direct messages when the caller supplies none
pub const DIRECT_MESSAGE_SUBJECT: &str = "Quick question";

/// More failed moderation items than this marks the pipeline unhealthy
pub const HEALTH_MAX_FAILED_ITEMS: usize = 10;

/// More pending drafts than this marks the pipeline degraded
pub const HEALTH_MAX_PENDING_ITEMS: usize = 50;

/// More items stuck in posting than this marks the pipeline degraded
pub const HEALTH_MAX_POSTING_ITEMS: usize = 10;

/// Attempts to take a document lock held by another process before giving up
pub const DOCUMENT_LOCK_ATTEMPTS: u32 = 200;

/// Pause between document lock attempts
pub const DOCUMENT_LOCK_RETRY_MILLIS: u64 = 5;

/// A document lock older than this was left behind by a crashed writer
pub const DOCUMENT_LOCK_STALE_SECONDS: u64 = 30;

/// Longest token lifetime accepted from a grant (one year)
pub const MAX_TOKEN_LIFETIME_SECONDS: i64 = 365 * 24 * 60 * 60;

//! Repository layer: thin, stateless wrappers over the connection pool.
//! Every operation is context-aware, logs entry/exit, and wraps storage
//! errors with a stable prefix. Invoked without a live pool, every
//! repository returns a "nil connection" error — a tested contract.

pub mod article;
pub mod external_api;
pub mod feed;
pub mod job;
pub mod models;
pub mod summary;

pub use article::ArticleRepository;
pub use external_api::ExternalApiRepository;
pub use feed::FeedRepository;
pub use job::SummarizeJobRepository;
pub use summary::SummaryRepository;

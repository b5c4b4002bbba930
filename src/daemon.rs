//! Owns every long-lived piece of state and wires the Grabber and SQL Writer
//! together. Constructed once in `main`, in place of the module-level
//! globals a long-running daemon like this has traditionally reached for.

use crate::config::Config;
use crate::dbconn;
use crate::descriptor::DescriptorCache;
use crate::queue;
use crate::rules::RuleEngine;
use crate::smax::SmaxClient;
use crate::writer::Writer;
use sqlx::PgPool;
use std::sync::Arc;

/// Descriptor cache ceiling; see [`crate::rules::CACHE_SIZE`] for the sibling
/// policy-cache limit. Both are logged-not-evicted ceilings rather than LRU
/// caches, since neither is expected to be reached in ordinary operation.
const DESCRIPTOR_CACHE_CAPACITY: usize = 200_000;

pub struct Daemon {
    pub config: Config,
    pub rules: Arc<RuleEngine>,
    pub descriptors: Arc<DescriptorCache>,
    pub pool: PgPool,
    pub smax: SmaxClient,
}

impl Daemon {
    /// Connects to both backing stores and assembles the daemon's shared
    /// state. Fails only if the initial SQL connection is exhausted or the
    /// source store is unreachable at startup.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let smax = SmaxClient::connect(&config.smax_server).await?;

        let opts = dbconn::connect_options(
            &config.sql_server,
            &config.sql_db,
            &config.sql_user,
            config.sql_auth.as_deref(),
        );
        let pool = dbconn::connect_with_retry(opts).await?;
        dbconn::ensure_master_table(&pool).await?;

        let rules = Arc::new(RuleEngine::new(&config));
        let descriptors = Arc::new(DescriptorCache::new(DESCRIPTOR_CACHE_CAPACITY));
        crate::scan::populate(&pool, &descriptors).await?;

        Ok(Daemon {
            config,
            rules,
            descriptors,
            pool,
            smax,
        })
    }

    /// Runs the grabber and writer tasks until one of them exits, then
    /// returns. Shutdown is driven by the caller dropping this future (via
    /// `tokio::select!` against a signal future in `main`).
    pub async fn run(self) -> anyhow::Result<()> {
        let (sender, receiver) = queue::channel();

        let writer = Writer::new(self.pool.clone(), Arc::clone(&self.descriptors), self.config.use_hyper_tables);
        let writer_task = tokio::spawn(writer.run(receiver, self.config.max_size));

        let grabber_task = tokio::spawn(crate::grabber::run(
            self.smax.clone(),
            Arc::clone(&self.rules),
            sender,
            self.config.update_interval,
            self.config.snapshot_interval,
            self.config.max_size,
        ));

        tokio::select! {
            res = writer_task => {
                res?;
                tracing::warn!("writer task exited");
            }
            res = grabber_task => {
                res?;
                tracing::warn!("grabber task exited");
            }
        }

        Ok(())
    }

    /// Reloads the config file and swaps in a fresh rule set (SIGHUP-style
    /// reconfiguration), leaving the SQL connection and descriptor cache
    /// untouched.
    pub fn reload_rules(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let fresh = Config::load(path)?;
        self.rules.reload(&fresh);
        Ok(())
    }
}

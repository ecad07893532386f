//! Cooperative engine loop.
//!
//! Three logical phases share one task: the transport start (connect +
//! subscription wait), the listen poll (keepalive, receive, decode,
//! dispatch) and the strategy tick. The 100 ms receive budget paces the
//! loop, so the strategy is evaluated roughly every poll. Running on a
//! single task is what lets the id registry and orders manager stay free
//! of locks: nothing interleaves between two non-suspending statements.

use tracing::{error, info};

use crate::config::Config;
use crate::emx::adapter::EmxAdapter;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::strategy::market_maker::MarketMaker;

pub struct Engine {
    adapter: EmxAdapter,
    strategy: MarketMaker,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let mut adapter = EmxAdapter::new(config.adapter);
        let strategy = MarketMaker::new(config.strategy, &mut adapter);
        Self { adapter, strategy }
    }

    /// Run until the strategy deactivates or a failure exhausts the
    /// reconnect budget.
    pub async fn run(&mut self) -> Result<()> {
        info!("🚀 engine is started");

        if let Err(err) = self.adapter.start().await {
            error!(%err, "initial start failed");
            self.strategy.handle_exception(&mut self.adapter, &err).await?;
        }

        loop {
            if self.adapter.is_stopped() || !self.strategy.is_active() {
                info!("engine is stopping");
                return Ok(());
            }

            match self.adapter.listen_once().await {
                Ok(Some(update)) => {
                    if let Err(err) =
                        self.strategy.on_market_update(&mut self.adapter, update).await
                    {
                        self.strategy.handle_exception(&mut self.adapter, &err).await?;
                        continue;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    self.strategy.handle_exception(&mut self.adapter, &err).await?;
                    continue;
                }
            }

            if let Err(err) = self.strategy.run(&mut self.adapter).await {
                self.strategy.handle_exception(&mut self.adapter, &err).await?;
            }
        }
    }
}

use std::sync::Arc;

use super::RemoteConnection;
use crate::connector::{ChannelConfig, Connector, ConnectorConfig};
use crate::error::SdkError;

impl RemoteConnection {
    pub(crate) fn initialize_connector(
        &self,
        persisted_channel: Option<ChannelConfig>,
    ) -> Result<Arc<dyn Connector>, SdkError> {
        let options = self.options();
        let mut dapp_metadata = options.dapp_metadata.clone();
        if dapp_metadata.is_empty() {
            dapp_metadata.name = self.originator_info().source;
        }

        let config = ConnectorConfig {
            platform_type: options.platform.platform_type(),
            communication_layer_preference: options.communication_layer_preference,
            communication_server_url: options.communication_server_url.clone(),
            sdk_version: options.sdk_version.clone(),
            context: "dapp".to_owned(),
            dapp_metadata,
            transports: options.transports.clone(),
            enable_analytics: options.analytics.is_enabled(),
            anon_id: self.originator_info().anon_id,
            storage_enabled: options.storage_enabled,
            logging: options.logging.runtime(),
            private_key: persisted_channel.as_ref().and_then(|config| config.local_key.clone()),
            persisted_channel,
        };
        if self.debug() {
            log::debug!(
                "[RemoteConnection: initialize_connector()] platform={} comm={}",
                config.platform_type.as_str(),
                config.communication_layer_preference.as_str()
            );
        }

        let connector = options.connector_factory.create(config)?;
        self.state().connector = Some(connector.clone());
        Ok(connector)
    }

    /// Releases the connector after a disconnect. A terminated session
    /// drops the connector and its listener so the next connect starts
    /// from a fresh one.
    pub(crate) fn cleanup_connector(&self, terminate: bool) {
        if !terminate {
            return;
        }
        {
            let mut state = self.state();
            state.connector = None;
            state.listener_attached = false;
        }
        if let Some(listener) =
            self.inner.listener.lock().expect("listener mutex poisoned").take()
        {
            listener.abort();
        }
    }
}

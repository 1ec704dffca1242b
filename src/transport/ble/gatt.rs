//! GATT server implementation

use bluer::{
    Adapter,
    gatt::local::{
        Application, ApplicationHandle, Characteristic, CharacteristicRead, CharacteristicWrite,
        CharacteristicWriteMethod, Service,
    },
};
use std::sync::Arc;
use tracing::info;

use super::{characteristics::CharacteristicHandler, session::BleSessions, uuids::*};

/// GATT server exposing the provisioning service
pub struct GattServer {
    sessions: BleSessions,
}

impl GattServer {
    pub fn new(sessions: BleSessions) -> Self {
        Self { sessions }
    }

    /// Build the GATT application
    pub fn build_application(&self) -> Application {
        let handler = Arc::new(CharacteristicHandler::new(self.sessions.clone()));

        Application {
            services: vec![self.build_provisioning_service(handler)],
            ..Default::default()
        }
    }

    fn build_provisioning_service(&self, handler: Arc<CharacteristicHandler>) -> Service {
        Service {
            uuid: PROVISIONING_SERVICE_UUID,
            primary: true,
            characteristics: vec![
                // Request characteristic, read by the peer
                Characteristic {
                    uuid: REQUEST_CHAR_UUID,
                    read: Some(CharacteristicRead {
                        read: true,
                        fun: {
                            let handler = handler.clone();
                            Box::new(move |req| {
                                let handler = handler.clone();
                                Box::pin(async move {
                                    handler
                                        .handle_request_read(req.device_address, req.offset)
                                        .await
                                })
                            })
                        },
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                // Response characteristic, written by the peer
                Characteristic {
                    uuid: RESPONSE_CHAR_UUID,
                    write: Some(CharacteristicWrite {
                        write: true,
                        write_without_response: false,
                        method: CharacteristicWriteMethod::Fun(Box::new(move |new_value, req| {
                            let handler = handler.clone();
                            Box::pin(async move {
                                handler
                                    .handle_response_write(
                                        req.device_address,
                                        new_value,
                                        req.offset,
                                    )
                                    .await
                            })
                        })),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    /// Register GATT application with adapter
    ///
    /// The application is served until the returned handle is dropped.
    pub async fn register(&self, adapter: &Adapter) -> Result<ApplicationHandle, bluer::Error> {
        info!("Registering GATT application");
        let handle = adapter
            .serve_gatt_application(self.build_application())
            .await?;
        info!("GATT application registered");
        Ok(handle)
    }
}

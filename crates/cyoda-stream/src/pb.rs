//! Protobuf types and client stubs for the platform stream.

pub mod cyoda {
    pub mod cloud {
        pub mod api {
            pub mod grpc {
                include!("generated/org.cyoda.cloud.api.grpc.rs");
            }
        }
    }
}

pub use cyoda::cloud::api::grpc::cloud_event;
pub use cyoda::cloud::api::grpc::cloud_events_service_client::CloudEventsServiceClient;
pub use cyoda::cloud::api::grpc::CloudEvent;

// Prost/tonic bindings for proto/orchestrator.proto. Kept in sync by hand;
// field tags and service paths must match the proto exactly.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxConfig {
    #[prost(string, tag = "1")]
    pub sandbox_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub execution_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub template_id: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub build_id: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub base_template_id: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub team_id: ::prost::alloc::string::String,
    #[prost(string, optional, tag = "7")]
    pub alias: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(uint32, tag = "8")]
    pub vcpu: u32,
    #[prost(uint64, tag = "9")]
    pub ram_mb: u64,
    #[prost(uint64, tag = "10")]
    pub total_disk_size_mb: u64,
    #[prost(string, tag = "11")]
    pub kernel_version: ::prost::alloc::string::String,
    #[prost(string, tag = "12")]
    pub firecracker_version: ::prost::alloc::string::String,
    #[prost(string, tag = "13")]
    pub envd_version: ::prost::alloc::string::String,
    #[prost(map = "string, string", tag = "14")]
    pub metadata: ::std::collections::HashMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
    /// Unix seconds.
    #[prost(int64, tag = "15")]
    pub start_time: i64,
    #[prost(int64, tag = "16")]
    pub end_time: i64,
    #[prost(int64, tag = "17")]
    pub max_sandbox_length_hours: i64,
    #[prost(bool, tag = "18")]
    pub auto_pause: bool,
    #[prost(bool, tag = "19")]
    pub allow_internet_access: bool,
    #[prost(string, optional, tag = "20")]
    pub envd_access_token: ::core::option::Option<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxCreateRequest {
    #[prost(message, optional, tag = "1")]
    pub sandbox: ::core::option::Option<SandboxConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxCreateResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxListRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxListResponse {
    #[prost(message, repeated, tag = "1")]
    pub sandboxes: ::prost::alloc::vec::Vec<SandboxConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxUpdateRequest {
    #[prost(string, tag = "1")]
    pub sandbox_id: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub end_time: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxUpdateResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxDeleteRequest {
    #[prost(string, tag = "1")]
    pub sandbox_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxDeleteResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxPauseRequest {
    #[prost(string, tag = "1")]
    pub sandbox_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub snapshot_template_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub snapshot_build_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SandboxPauseResponse {}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
)]
#[repr(i32)]
pub enum ServiceStatus {
    Unspecified = 0,
    Ready = 1,
    Draining = 2,
    Unhealthy = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MachineInfo {
    #[prost(string, tag = "1")]
    pub cpu_architecture: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub cpu_family: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub cpu_model: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DiskMetrics {
    #[prost(string, tag = "1")]
    pub mount_point: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub used_mb: u64,
    #[prost(uint64, tag = "3")]
    pub total_mb: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServiceInfoRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServiceInfoResponse {
    #[prost(string, tag = "1")]
    pub node_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub service_instance_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub service_version: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub service_commit: ::prost::alloc::string::String,
    #[prost(enumeration = "ServiceStatus", tag = "5")]
    pub service_status: i32,
    #[prost(message, optional, tag = "6")]
    pub machine: ::core::option::Option<MachineInfo>,
    #[prost(uint32, tag = "7")]
    pub cpu_count: u32,
    #[prost(uint32, tag = "8")]
    pub cpu_allocated: u32,
    #[prost(float, tag = "9")]
    pub cpu_used_percent: f32,
    #[prost(uint64, tag = "10")]
    pub memory_total_mb: u64,
    #[prost(uint64, tag = "11")]
    pub memory_used_mb: u64,
    #[prost(uint64, tag = "12")]
    pub memory_allocated_mb: u64,
    #[prost(message, repeated, tag = "13")]
    pub disks: ::prost::alloc::vec::Vec<DiskMetrics>,
    #[prost(uint32, tag = "14")]
    pub sandbox_count: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServiceStatusOverrideRequest {
    #[prost(enumeration = "ServiceStatus", tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServiceStatusOverrideResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TemplateConfig {
    #[prost(string, tag = "1")]
    pub template_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub build_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub team_id: ::prost::alloc::string::String,
    #[prost(uint32, tag = "4")]
    pub vcpu: u32,
    #[prost(uint64, tag = "5")]
    pub ram_mb: u64,
    #[prost(uint64, tag = "6")]
    pub disk_size_mb: u64,
    #[prost(string, tag = "7")]
    pub kernel_version: ::prost::alloc::string::String,
    #[prost(string, tag = "8")]
    pub firecracker_version: ::prost::alloc::string::String,
    #[prost(string, optional, tag = "9")]
    pub start_command: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "10")]
    pub from_image: ::core::option::Option<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TemplateCreateRequest {
    #[prost(message, optional, tag = "1")]
    pub template: ::core::option::Option<TemplateConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TemplateCreateResponse {}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
)]
#[repr(i32)]
pub enum TemplateBuildState {
    Waiting = 0,
    Building = 1,
    Completed = 2,
    Failed = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TemplateBuildError {
    #[prost(string, tag = "1")]
    pub message: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub step: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TemplateBuildMetadata {
    #[prost(uint64, tag = "1")]
    pub rootfs_size_mb: u64,
    #[prost(string, tag = "2")]
    pub envd_version: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TemplateBuildStatusRequest {
    #[prost(string, tag = "1")]
    pub build_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub template_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TemplateBuildStatusResponse {
    #[prost(enumeration = "TemplateBuildState", tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub reason: ::core::option::Option<TemplateBuildError>,
    #[prost(message, optional, tag = "3")]
    pub metadata: ::core::option::Option<TemplateBuildMetadata>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TemplateBuildDeleteRequest {
    #[prost(string, tag = "1")]
    pub build_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub template_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TemplateBuildDeleteResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InitLayerFileUploadRequest {
    #[prost(string, tag = "1")]
    pub template_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub hash: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InitLayerFileUploadResponse {
    #[prost(bool, tag = "1")]
    pub present: bool,
    #[prost(string, optional, tag = "2")]
    pub upload_url: ::core::option::Option<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListCachedBuildsRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CachedBuildInfo {
    #[prost(string, tag = "1")]
    pub build_id: ::prost::alloc::string::String,
    /// Unix seconds at which the worker forgets the cached build.
    #[prost(int64, tag = "2")]
    pub expiration_time: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListCachedBuildsResponse {
    #[prost(message, repeated, tag = "1")]
    pub builds: ::prost::alloc::vec::Vec<CachedBuildInfo>,
}

/// Generated client implementations.
pub mod sandbox_service_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::wildcard_imports)]
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct SandboxServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl SandboxServiceClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> SandboxServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }

        pub async fn create(
            &mut self,
            request: impl tonic::IntoRequest<super::SandboxCreateRequest>,
        ) -> std::result::Result<tonic::Response<super::SandboxCreateResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/orchestrator.SandboxService/Create");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("orchestrator.SandboxService", "Create"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn list(
            &mut self,
            request: impl tonic::IntoRequest<super::SandboxListRequest>,
        ) -> std::result::Result<tonic::Response<super::SandboxListResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/orchestrator.SandboxService/List");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("orchestrator.SandboxService", "List"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn update(
            &mut self,
            request: impl tonic::IntoRequest<super::SandboxUpdateRequest>,
        ) -> std::result::Result<tonic::Response<super::SandboxUpdateResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/orchestrator.SandboxService/Update");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("orchestrator.SandboxService", "Update"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn delete(
            &mut self,
            request: impl tonic::IntoRequest<super::SandboxDeleteRequest>,
        ) -> std::result::Result<tonic::Response<super::SandboxDeleteResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/orchestrator.SandboxService/Delete");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("orchestrator.SandboxService", "Delete"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn pause(
            &mut self,
            request: impl tonic::IntoRequest<super::SandboxPauseRequest>,
        ) -> std::result::Result<tonic::Response<super::SandboxPauseResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/orchestrator.SandboxService/Pause");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("orchestrator.SandboxService", "Pause"));
            self.inner.unary(req, path, codec).await
        }
    }
}

/// Generated client implementations.
pub mod info_service_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::wildcard_imports)]
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct InfoServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl InfoServiceClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> InfoServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }

        pub async fn service_info(
            &mut self,
            request: impl tonic::IntoRequest<super::ServiceInfoRequest>,
        ) -> std::result::Result<tonic::Response<super::ServiceInfoResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/orchestrator.InfoService/ServiceInfo");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("orchestrator.InfoService", "ServiceInfo"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn service_status_override(
            &mut self,
            request: impl tonic::IntoRequest<super::ServiceStatusOverrideRequest>,
        ) -> std::result::Result<
            tonic::Response<super::ServiceStatusOverrideResponse>,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/orchestrator.InfoService/ServiceStatusOverride",
            );
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new(
                "orchestrator.InfoService",
                "ServiceStatusOverride",
            ));
            self.inner.unary(req, path, codec).await
        }
    }
}

/// Generated client implementations.
pub mod template_service_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::wildcard_imports)]
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct TemplateServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl TemplateServiceClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> TemplateServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }

        pub async fn template_create(
            &mut self,
            request: impl tonic::IntoRequest<super::TemplateCreateRequest>,
        ) -> std::result::Result<tonic::Response<super::TemplateCreateResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/orchestrator.TemplateService/TemplateCreate",
            );
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new(
                "orchestrator.TemplateService",
                "TemplateCreate",
            ));
            self.inner.unary(req, path, codec).await
        }

        pub async fn template_build_status(
            &mut self,
            request: impl tonic::IntoRequest<super::TemplateBuildStatusRequest>,
        ) -> std::result::Result<tonic::Response<super::TemplateBuildStatusResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/orchestrator.TemplateService/TemplateBuildStatus",
            );
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new(
                "orchestrator.TemplateService",
                "TemplateBuildStatus",
            ));
            self.inner.unary(req, path, codec).await
        }

        pub async fn template_build_delete(
            &mut self,
            request: impl tonic::IntoRequest<super::TemplateBuildDeleteRequest>,
        ) -> std::result::Result<tonic::Response<super::TemplateBuildDeleteResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/orchestrator.TemplateService/TemplateBuildDelete",
            );
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new(
                "orchestrator.TemplateService",
                "TemplateBuildDelete",
            ));
            self.inner.unary(req, path, codec).await
        }

        pub async fn init_layer_file_upload(
            &mut self,
            request: impl tonic::IntoRequest<super::InitLayerFileUploadRequest>,
        ) -> std::result::Result<tonic::Response<super::InitLayerFileUploadResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/orchestrator.TemplateService/InitLayerFileUpload",
            );
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new(
                "orchestrator.TemplateService",
                "InitLayerFileUpload",
            ));
            self.inner.unary(req, path, codec).await
        }

        pub async fn list_cached_builds(
            &mut self,
            request: impl tonic::IntoRequest<super::ListCachedBuildsRequest>,
        ) -> std::result::Result<tonic::Response<super::ListCachedBuildsResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/orchestrator.TemplateService/ListCachedBuilds",
            );
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new(
                "orchestrator.TemplateService",
                "ListCachedBuilds",
            ));
            self.inner.unary(req, path, codec).await
        }
    }
}

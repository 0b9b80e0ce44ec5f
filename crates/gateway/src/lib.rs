//! gRPC transport for the remex process-execution service.
//!
//! Request flow: TLS handshake → [`auth::PrincipalExtractor`] interceptor →
//! per-method policy gate → supervisor operation; every handler error is
//! wrapped into the [`envelope`] cause-chain format on its way out.

#![deny(unsafe_code)]

pub mod auth;
pub mod client;
pub mod envelope;
pub mod tls;

use std::sync::Arc;
use std::time::SystemTime;

use tonic::service::interceptor::InterceptedService;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use policy::Policy;
use remex_core::context::CallContext;
use remex_core::error::Error;
use remex_core::process::{OutputStream, ProcessInfo};
use supervisor::Supervisor;

use auth::{Principal, PrincipalExtractor};

#[allow(missing_docs)]
pub mod remex_v1 {
    //! Generated wire schema (`remex.v1`).
    tonic::include_proto!("remex.v1");
}

use remex_v1::executor_server::{Executor, ExecutorServer};
use remex_v1::{
    read_request, ExecRequest, ExecResponse, GetProcessInfoRequest, KillRequest, KillResponse,
    ListProcessInfoRequest, ListProcessInfoResponse, ReadRequest, ReadResponse,
};

pub mod methods {
    //! Full method names of the service, as seen by the policy engine.
    //!
    //! Policy actions are validated against [`ALL`]; a new rpc must be
    //! added here to become grantable.

    /// `Exec` full method name.
    pub const EXEC: &str = "/remex.v1.Executor/Exec";
    /// `ListProcessInfo` full method name.
    pub const LIST_PROCESS_INFO: &str = "/remex.v1.Executor/ListProcessInfo";
    /// `GetProcessInfo` full method name.
    pub const GET_PROCESS_INFO: &str = "/remex.v1.Executor/GetProcessInfo";
    /// `Kill` full method name.
    pub const KILL: &str = "/remex.v1.Executor/Kill";
    /// `Read` full method name.
    pub const READ: &str = "/remex.v1.Executor/Read";
    /// Every method the service exposes.
    pub const ALL: [&str; 5] = [EXEC, LIST_PROCESS_INFO, GET_PROCESS_INFO, KILL, READ];
}

/// Service state: the supervisor plus the policy chain gating every method.
pub struct ExecutorService {
    supervisor: Arc<Supervisor>,
    policy: Policy,
}

impl ExecutorService {
    /// Wire a supervisor and a policy into a service.
    pub fn new(supervisor: Arc<Supervisor>, policy: Policy) -> Self {
        Self { supervisor, policy }
    }

    /// The tonic server with the principal-extraction interceptor in front.
    pub fn into_server(self) -> InterceptedService<ExecutorServer<Self>, PrincipalExtractor> {
        ExecutorServer::with_interceptor(self, PrincipalExtractor)
    }

    // Builds the call context from the interceptor-attached principal and
    // the method name, then applies the policy gate: deny-by-default, any
    // applying deny is absolute.
    fn authorize<T>(&self, req: &Request<T>, method: &str) -> Result<CallContext, Status> {
        let mut ctx = CallContext::new().with_method(method);
        if let Some(Principal(principal)) = req.extensions().get::<Principal>() {
            ctx = ctx.with_principal(principal.clone());
        }
        debug!(method, principal = ctx.principal().unwrap_or("<none>"), "policy check");
        if !self.policy.evaluate(&ctx).permits() {
            return Err(envelope::status_from_error(&Error::AccessDenied));
        }
        Ok(ctx)
    }
}

#[tonic::async_trait]
impl Executor for ExecutorService {
    #[instrument(skip_all)]
    async fn exec(&self, req: Request<ExecRequest>) -> Result<Response<ExecResponse>, Status> {
        let ctx = self.authorize(&req, methods::EXEC)?;
        let r = req.into_inner();
        let id = self
            .supervisor
            .exec(&ctx, &r.path, &r.args)
            .await
            .map_err(|e| envelope::status_from_error(&e))?;
        info!(%id, path = %r.path, "exec accepted");
        Ok(Response::new(ExecResponse { process_id: id.to_string() }))
    }

    #[instrument(skip_all)]
    async fn list_process_info(
        &self,
        req: Request<ListProcessInfoRequest>,
    ) -> Result<Response<ListProcessInfoResponse>, Status> {
        let ctx = self.authorize(&req, methods::LIST_PROCESS_INFO)?;
        let infos = self
            .supervisor
            .list_process_info(&ctx)
            .map_err(|e| envelope::status_from_error(&e))?;
        let processes = infos.into_iter().map(process_info_to_wire).collect();
        Ok(Response::new(ListProcessInfoResponse { processes }))
    }

    #[instrument(skip_all)]
    async fn get_process_info(
        &self,
        req: Request<GetProcessInfoRequest>,
    ) -> Result<Response<remex_v1::ProcessInfo>, Status> {
        let ctx = self.authorize(&req, methods::GET_PROCESS_INFO)?;
        let id = parse_process_id(&req.get_ref().process_id)?;
        let info = self
            .supervisor
            .get_process_info(&ctx, id)
            .map_err(|e| envelope::status_from_error(&e))?;
        Ok(Response::new(process_info_to_wire(info)))
    }

    #[instrument(skip_all)]
    async fn kill(&self, req: Request<KillRequest>) -> Result<Response<KillResponse>, Status> {
        let ctx = self.authorize(&req, methods::KILL)?;
        let r = req.get_ref();
        let id = parse_process_id(&r.process_id)?;
        self.supervisor
            .kill(&ctx, id, r.signal)
            .map_err(|e| envelope::status_from_error(&e))?;
        Ok(Response::new(KillResponse {}))
    }

    #[instrument(skip_all)]
    async fn read(&self, req: Request<ReadRequest>) -> Result<Response<ReadResponse>, Status> {
        let ctx = self.authorize(&req, methods::READ)?;
        let r = req.get_ref();
        let id = parse_process_id(&r.process_id)?;
        let target = match read_request::Target::try_from(r.target) {
            Ok(read_request::Target::Stdout) => OutputStream::Stdout,
            Ok(read_request::Target::Stderr) => OutputStream::Stderr,
            Err(_) => return Err(envelope::status_from_error(&Error::InvalidArgument)),
        };
        let content = self
            .supervisor
            .read(&ctx, id, target)
            .await
            .map_err(|e| envelope::status_from_error(&e))?;
        Ok(Response::new(ReadResponse { content }))
    }
}

fn parse_process_id(raw: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(raw).map_err(|_| envelope::status_from_error(&Error::InvalidArgument))
}

/// Core snapshot → wire message. Timestamps stay UTC; the zero instant maps
/// to the zero timestamp.
pub fn process_info_to_wire(info: ProcessInfo) -> remex_v1::ProcessInfo {
    remex_v1::ProcessInfo {
        process_id: info.id.to_string(),
        pid: info.pid as i32,
        exit_code: info.exit_code,
        running: info.running,
        path: info.path,
        args: info.args,
        owner_id: info.owner_id,
        create: Some(prost_types::Timestamp::from(info.create)),
        exit: Some(prost_types::Timestamp::from(info.exit)),
    }
}

/// Wire message → core snapshot. Malformed ids or out-of-range timestamps
/// are invalid-argument errors to the immediate caller.
pub fn process_info_from_wire(wire: remex_v1::ProcessInfo) -> Result<ProcessInfo, Error> {
    Ok(ProcessInfo {
        id: Uuid::parse_str(&wire.process_id).map_err(|_| Error::InvalidArgument)?,
        pid: wire.pid as u32,
        exit_code: wire.exit_code,
        running: wire.running,
        path: wire.path,
        args: wire.args,
        owner_id: wire.owner_id,
        create: timestamp_to_system(wire.create)?,
        exit: timestamp_to_system(wire.exit)?,
    })
}

fn timestamp_to_system(ts: Option<prost_types::Timestamp>) -> Result<SystemTime, Error> {
    match ts {
        None => Ok(SystemTime::UNIX_EPOCH),
        Some(ts) => SystemTime::try_from(ts).map_err(|_| Error::InvalidArgument),
    }
}

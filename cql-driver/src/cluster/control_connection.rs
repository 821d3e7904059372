use cql_protocol::consistency::Consistency;
use cql_protocol::frame::events::{
    ServerEvent, SimpleServerEvent, StatusChangeType, TopologyChangeType,
};
use cql_protocol::frame::message_register::BodyReqRegister;
use cql_protocol::frame::message_response::ResponseBody;
use cql_protocol::frame::message_result::{BodyResResultRows, ResResultBody, Row};
use cql_protocol::frame::{Frame, Opcode};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::time::sleep;
use tracing::*;

use crate::cluster::cluster_metadata_manager::ClusterMetadataManager;
use crate::cluster::connection_manager::unexpected_response;
use crate::cluster::{ConnectionManager, HostInfo};
use crate::error::{Error, Result};
use crate::load_balancing::Request;
use crate::retry::ReconnectionSchedule;
use crate::statement::Statement;
use crate::transport::CqlTransport;

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);
const EVENT_CHANNEL_CAPACITY: usize = 32;

const SELECT_LOCAL: &str =
    "SELECT data_center, rack, host_id, rpc_address FROM system.local WHERE key='local'";
const SELECT_PEERS: &str = "SELECT peer, data_center, rack, host_id, rpc_address FROM system.peers";

/// The connection used to discover hosts and to receive cluster events. Events are applied to
/// the host registry and re-broadcast to session subscribers.
pub(crate) struct ControlConnection<T: CqlTransport + 'static, CM: ConnectionManager<T> + 'static>
{
    cluster: Arc<ClusterMetadataManager<T, CM>>,
    event_sender: broadcast::Sender<ServerEvent>,
    connection: Option<T>,
    event_frame_receiver: Receiver<Frame>,
    error_receiver: Receiver<Error>,
    event_frame_sender: Sender<Frame>,
    error_sender: Sender<Error>,
}

impl<T: CqlTransport + 'static, CM: ConnectionManager<T> + 'static> ControlConnection<T, CM> {
    /// Connects to the first reachable host of the query plan, registers for events and
    /// refreshes the host list.
    pub(crate) async fn connect(
        cluster: Arc<ClusterMetadataManager<T, CM>>,
        event_sender: broadcast::Sender<ServerEvent>,
    ) -> Result<Self> {
        let (event_frame_sender, event_frame_receiver) = channel(EVENT_CHANNEL_CAPACITY);
        let (error_sender, error_receiver) = channel(1);

        let mut control_connection = ControlConnection {
            cluster,
            event_sender,
            connection: None,
            event_frame_receiver,
            error_receiver,
            event_frame_sender,
            error_sender,
        };

        control_connection.establish().await?;
        Ok(control_connection)
    }

    /// Address of the current connection, if any.
    #[inline]
    pub(crate) fn address(&self) -> Option<SocketAddr> {
        self.connection.as_ref().map(CqlTransport::address)
    }

    /// Processes events until the session is closed, reconnecting whenever the connection
    /// breaks.
    pub(crate) async fn run(mut self) {
        loop {
            if self.connection.is_none() {
                self.reconnect().await;
                continue;
            }

            tokio::select! {
                frame = self.event_frame_receiver.recv() => {
                    if let Some(frame) = frame {
                        self.process_event(frame).await;
                    }
                }
                error = self.error_receiver.recv() => {
                    if let Some(error) = error {
                        error!(%error, "Error in control connection! Trying to reconnect.");
                    }

                    self.connection = None;
                }
            }

            if self.cluster.is_closed() {
                break;
            }
        }

        debug!("Control connection stopped.");
    }

    async fn reconnect(&mut self) {
        let mut schedule = self.cluster.reconnection_policy().new_host_schedule();

        loop {
            if self.cluster.is_closed() {
                return;
            }

            match self.establish().await {
                Ok(()) => return,
                Err(error) => {
                    warn!(%error, "Unable to establish control connection.");
                    Self::wait_for_reconnection(&mut schedule).await;
                }
            }
        }
    }

    async fn wait_for_reconnection(schedule: &mut Box<dyn ReconnectionSchedule + Send + Sync>) {
        // as long as the session is alive, try establishing control connection
        let delay = schedule.next_delay().unwrap_or(DEFAULT_RECONNECT_DELAY);
        sleep(delay).await;
    }

    async fn establish(&mut self) -> Result<()> {
        let hosts = self.cluster.hosts();
        let request = Request::new(None, Consistency::One, None);
        let plan = self.cluster.load_balancing().query_plan(&request, &hosts);

        let mut tried = vec![];
        let mut last_error = None;

        for host in plan {
            let addr = host.address();
            tried.push(addr);

            let connection = self
                .cluster
                .connection_manager()
                .connection(
                    Some(self.event_frame_sender.clone()),
                    Some(self.error_sender.clone()),
                    addr,
                    self.cluster.handle().clone(),
                )
                .await;

            let connection = match connection {
                Ok(connection) => connection,
                Err(error) => {
                    warn!(%error, ?addr, "Unable to open control connection.");
                    last_error = Some(Box::new(error));
                    continue;
                }
            };

            if let Err(error) = Self::register(&connection).await {
                warn!(%error, ?addr, "Error subscribing to events.");
                connection.close();
                last_error = Some(Box::new(error));
                continue;
            }

            debug!(?addr, "Established new control connection.");
            self.refresh_hosts(&connection).await;
            self.connection = Some(connection);

            return Ok(());
        }

        Err(Error::NoHostsAvailable { tried, last_error })
    }

    async fn register(connection: &T) -> Result<()> {
        let register_frame = Frame::new_req_register(
            &BodyReqRegister {
                events: vec![
                    SimpleServerEvent::TopologyChange,
                    SimpleServerEvent::StatusChange,
                    SimpleServerEvent::SchemaChange,
                ],
            },
            connection.version(),
        );

        let response = connection.write_frame(&register_frame).await?;
        if response.opcode != Opcode::Ready {
            return Err(unexpected_response(&response, connection.address()));
        }

        Ok(())
    }

    async fn refresh_hosts(&self, connection: &T) {
        match Self::discover_hosts(connection).await {
            Ok(hosts) => self.cluster.refresh(hosts).await,
            // some servers don't expose system tables; keep the hosts we have
            Err(error) => warn!(%error, "Unable to discover hosts, keeping known hosts."),
        }
    }

    async fn process_event(&mut self, frame: Frame) {
        let event = match frame.response_body() {
            Ok(ResponseBody::Event(event)) => event,
            Ok(_) => return,
            Err(error) => {
                warn!(%error, "Invalid event frame.");
                return;
            }
        };

        debug!(?event, "Received server event.");

        match &event {
            ServerEvent::StatusChange(change) => match change.change_type {
                StatusChangeType::Up => self.cluster.host_up(change.addr).await,
                StatusChangeType::Down => self.cluster.host_down(change.addr),
            },
            ServerEvent::TopologyChange(change) => {
                match change.change_type {
                    TopologyChangeType::NewNode => {
                        self.cluster
                            .add_host(change.addr, HostInfo::default())
                            .await;
                    }
                    TopologyChangeType::RemovedNode => {
                        self.cluster.remove_host(change.addr).await;
                    }
                    TopologyChangeType::MovedNode => {}
                }

                // fill in the location of new hosts
                if let Some(connection) = &self.connection {
                    self.refresh_hosts(connection).await;
                }
            }
            ServerEvent::SchemaChange(_) => {}
        }

        // nobody listening is fine
        let _ = self.event_sender.send(event);
    }

    async fn discover_hosts(connection: &T) -> Result<Vec<(SocketAddr, HostInfo)>> {
        let control_addr = connection.address();

        let local = Self::send_query(SELECT_LOCAL, connection).await?;
        let local = local.rows().next().ok_or_else(|| {
            Error::Protocol(format!("Host {control_addr} failed to return info about itself").into())
        })?;

        // system.local.rpc_address may not be the broadcast one; we know the endpoint anyway
        let mut hosts = vec![(control_addr, Self::build_host_info(&local)?)];

        let peers = Self::send_query(SELECT_PEERS, connection).await?;
        for row in peers.rows() {
            match Self::peer_address(&row, control_addr.port()) {
                Ok(Some(addr)) if addr != control_addr => {
                    hosts.push((addr, Self::build_host_info(&row)?));
                }
                Ok(Some(addr)) => {
                    warn!(
                        ?addr,
                        "Control host found itself in system.peers; check rpc_address configuration."
                    );
                }
                Ok(None) => {
                    warn!("Peer without address found in system.peers, skipping.");
                }
                Err(error) => return Err(error),
            }
        }

        Ok(hosts)
    }

    async fn send_query(query: &str, connection: &T) -> Result<BodyResResultRows> {
        let frame = Statement::new(query).to_frame(Consistency::One, connection.version());
        let response = connection.write_frame(&frame).await?;

        match response.response_body()? {
            ResponseBody::Result(ResResultBody::Rows(rows)) => Ok(rows),
            _ => Err(unexpected_response(&response, connection.address())),
        }
    }

    fn build_host_info(row: &Row) -> Result<HostInfo> {
        Ok(HostInfo {
            datacenter: row.get_text("data_center")?,
            rack: row.get_text("rack")?,
            host_id: row.get_uuid("host_id")?,
        })
    }

    fn peer_address(row: &Row, port: u16) -> Result<Option<SocketAddr>> {
        let rpc_address = row.get_inet("rpc_address")?;
        let address = match rpc_address {
            // bound to every interface, so the peer address is the one to use
            Some(address) if address.is_unspecified() => row.get_inet("peer")?,
            Some(address) => Some(address),
            None => row.get_inet("peer")?,
        };

        Ok(address.map(|address: IpAddr| SocketAddr::new(address, port)))
    }
}

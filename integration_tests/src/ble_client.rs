//! BLE client for receiving records from the bridge via Nordic UART Service.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::time::timeout;
use uuid::Uuid;

/// Nordic UART Service UUIDs
pub const NUS_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
const NUS_RX_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e); // Write to device
const NUS_TX_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e); // Notify from device

/// BLE client connected to the bridge.
///
/// Every notification on the TX characteristic is one record.
pub struct BleClient {
    peripheral: Peripheral,
    rx_char: Characteristic,
    tx_char: Characteristic,
    /// Records received, oldest first
    records: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl BleClient {
    /// Scan for a device by name and connect.
    pub async fn connect_by_name(name: &str, scan_timeout: Duration) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No Bluetooth adapters found"))?;

        // Start scanning
        adapter.start_scan(ScanFilter::default()).await?;

        // Wait for the device to appear
        let peripheral = Self::find_device_by_name(&adapter, name, scan_timeout).await?;

        adapter.stop_scan().await?;

        // Connect to the device
        peripheral.connect().await?;

        // Discover services
        peripheral.discover_services().await?;

        // Find NUS characteristics
        let characteristics = peripheral.characteristics();

        let rx_char = characteristics
            .iter()
            .find(|c| c.uuid == NUS_RX_UUID)
            .cloned()
            .ok_or_else(|| anyhow!("NUS RX characteristic not found"))?;

        let tx_char = characteristics
            .iter()
            .find(|c| c.uuid == NUS_TX_UUID)
            .cloned()
            .ok_or_else(|| anyhow!("NUS TX characteristic not found"))?;

        // Subscribe to notifications on TX characteristic
        peripheral.subscribe(&tx_char).await?;

        let records = Arc::new(Mutex::new(VecDeque::new()));

        // Spawn notification handler
        let records_clone = records.clone();
        let peripheral_clone = peripheral.clone();
        tokio::spawn(async move {
            let mut stream = match peripheral_clone.notifications().await {
                Ok(s) => s,
                Err(_) => return,
            };

            while let Some(data) = stream.next().await {
                if data.uuid == NUS_TX_UUID {
                    records_clone.lock().await.push_back(data.value);
                }
            }
        });

        Ok(Self {
            peripheral,
            rx_char,
            tx_char,
            records,
        })
    }

    /// Find a device by name within the scan timeout.
    async fn find_device_by_name(
        adapter: &Adapter,
        name: &str,
        scan_timeout: Duration,
    ) -> Result<Peripheral> {
        let start = std::time::Instant::now();

        while start.elapsed() < scan_timeout {
            let peripherals = adapter.peripherals().await?;

            for peripheral in peripherals {
                if let Some(props) = peripheral.properties().await? {
                    if props.local_name.as_deref() == Some(name) {
                        // The bridge advertises the service UUID alongside its name
                        if !props.services.is_empty() && !props.services.contains(&NUS_SERVICE_UUID) {
                            continue;
                        }
                        return Ok(peripheral);
                    }
                }
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        Err(anyhow!("Device '{}' not found within timeout", name))
    }

    /// Wait for the next record.
    pub async fn wait_for_record(&self, record_timeout: Duration) -> Result<Vec<u8>> {
        let result = timeout(record_timeout, async {
            loop {
                if let Some(record) = self.records.lock().await.pop_front() {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        result.map_err(|_| anyhow!("Timeout waiting for BLE record"))
    }

    /// Wait for `count` records, in arrival order.
    pub async fn wait_for_records(&self, count: usize, record_timeout: Duration) -> Result<Vec<Vec<u8>>> {
        let mut received = Vec::with_capacity(count);
        for i in 0..count {
            let record = self
                .wait_for_record(record_timeout)
                .await
                .map_err(|e| anyhow!("record {} of {}: {}", i + 1, count, e))?;
            received.push(record);
        }
        Ok(received)
    }

    /// Check that no record arrives within `quiet`.
    pub async fn expect_silence(&self, quiet: Duration) -> Result<()> {
        match self.wait_for_record(quiet).await {
            Ok(record) => Err(anyhow!(
                "Unexpected record: {:?}",
                String::from_utf8_lossy(&record)
            )),
            Err(_) => Ok(()),
        }
    }

    /// Write bytes to the RX characteristic.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        self.peripheral
            .write(&self.rx_char, data, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    /// Disconnect from the device.
    pub async fn disconnect(&self) -> Result<()> {
        self.peripheral.unsubscribe(&self.tx_char).await?;
        self.peripheral.disconnect().await?;
        Ok(())
    }

    /// Drop any records received so far.
    pub async fn clear_buffer(&self) {
        self.records.lock().await.clear();
    }
}

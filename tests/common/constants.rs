//! Shared constants for end-to-end tests
//!
//! This module contains all constants used across the test suite.
//! When test data changes (user credentials, catalog IDs, etc.),
//! update only this file.
#![allow(dead_code)]

// ============================================================================
// Test User Credentials
// ============================================================================

/// Regular test user handle
pub const TEST_USER: &str = "testuser";

/// Regular test user password
pub const TEST_PASS: &str = "testpass123";

// ============================================================================
// Test Catalog IDs
// ============================================================================

/// Set loaded into the catalog when the server starts
pub const SET_1_ID: &str = "1234-1";

/// Name of SET_1_ID
pub const SET_1_NAME: &str = "Fire Station";

/// Set known to the fake API but not loaded into the catalog
pub const SET_2_ID: &str = "42-1";

/// Name of SET_2_ID
pub const SET_2_NAME: &str = "Space Shuttle";

/// Set the fake API answers with 404
pub const MISSING_SET_ID: &str = "999-1";

/// Shape of the red and blue bricks in SET_1_ID
pub const BRICK_SHAPE_ID: &str = "3001";

/// Name of BRICK_SHAPE_ID
pub const BRICK_SHAPE_NAME: &str = "Brick 2 x 4";

/// Shape of the plate in SET_1_ID and SET_2_ID
pub const PLATE_SHAPE_ID: &str = "3020";

/// Name of PLATE_SHAPE_ID
pub const PLATE_SHAPE_NAME: &str = "Plate 2 x 4";

/// Minifigure in SET_1_ID, it has no color
pub const MINIFIG_ID: &str = "fig-000123";

/// Name of MINIFIG_ID
pub const MINIFIG_NAME: &str = "Firefighter";

// ============================================================================
// Image URLs served by the fake fetcher
// ============================================================================

/// Image URL prefix the fake fetcher answers with a PNG
pub const PNG_URL_PREFIX: &str = "https://cdn.test/png/";

/// Image URL the fake fetcher answers with bytes of an unsupported format
pub const UNSUPPORTED_IMAGE_URL: &str = "https://cdn.test/other/fig.gif";

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for the server to accept requests
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Delay between readiness polls
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

/// Request timeout of the test client
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

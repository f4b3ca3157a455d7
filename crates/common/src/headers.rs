// MiniOxygen - local edge worker emulation
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Header names shared across the request path

/// Correlates a front-server request with its dispatch and lifecycle event.
pub const REQUEST_ID_HEADER: &str = "request-id";

/// Tells the worker (and the profiler) why a request was made, e.g. `prefetch`.
pub const PURPOSE_HEADER: &str = "purpose";

/// Headers the production edge host always sets on inbound requests,
/// paired with the value used locally when the client did not send one.
pub const OXYGEN_DEFAULT_HEADERS: &[(&str, &str)] = &[
    ("oxygen-buyer-ip", "127.0.0.1"),
    ("oxygen-buyer-latitude", "43.6532"),
    ("oxygen-buyer-longitude", "-79.3832"),
    ("oxygen-buyer-continent", "NA"),
    ("oxygen-buyer-country", "CA"),
    ("oxygen-buyer-region", "Ontario"),
    ("oxygen-buyer-region-code", "ON"),
    ("oxygen-buyer-city", "Toronto"),
    ("oxygen-buyer-timezone", "America/Toronto"),
    ("oxygen-buyer-postal-code", "M5V"),
    ("oxygen-buyer-shop-id", "development"),
    ("oxygen-buyer-storefront-id", "development"),
    ("oxygen-buyer-deployment-id", "local"),
];
